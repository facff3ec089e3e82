//! Protocol error types and result codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced while decoding a single frame.
///
/// A framing error condemns only the frame it occurred in; the de-framer
/// continues with the next terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("missing frame terminator (0x00)")]
    MissingTerminator,

    #[error("zero code byte at offset {offset}")]
    ZeroCode { offset: usize },

    #[error("code claims {claimed} bytes but only {remaining} remain before the terminator")]
    CodeOverrun { claimed: usize, remaining: usize },
}

/// Protocol-level errors that can occur during framing or message handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("malformed message payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable result codes carried in device acknowledgements.
///
/// These codes are part of the wire contract and must remain stable. The one
/// exception is [`ResultCode::Timeout`], which is synthesized locally when no
/// reply arrives within the deadline and is never sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    BadParameter,
    Busy,
    HardwareFault,
    UnknownError,
    Timeout,
}

impl ResultCode {
    /// Returns whether the request succeeded.
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Returns whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResultCode::Busy | ResultCode::Timeout)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "OK"),
            ResultCode::BadParameter => write!(f, "BAD_PARAMETER"),
            ResultCode::Busy => write!(f, "BUSY"),
            ResultCode::HardwareFault => write!(f, "HARDWARE_FAULT"),
            ResultCode::UnknownError => write!(f, "UNKNOWN_ERROR"),
            ResultCode::Timeout => write!(f, "TIMEOUT"),
        }
    }
}
