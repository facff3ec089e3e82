//! Transport error types.

use thiserror::Error;

/// Errors from the physical link layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("link is not open")]
    NotOpen,
}
