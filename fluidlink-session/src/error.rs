//! Session error types.

use fluidlink_protocol::ProtocolError;
use fluidlink_transport::TransportError;
use thiserror::Error;

/// Errors surfaced by the session façade.
///
/// Per-request outcomes (including deadline expiry) are reported through
/// [`ResultCode`](fluidlink_protocol::ResultCode), not through this type.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
}
