//! # fluidlink-protocol
//!
//! Wire protocol implementation for fluidlink.
//!
//! This crate provides:
//! - COBS byte-stuffing frame codec (sentinel 0x00)
//! - Stream de-framer for reassembling frames from raw chunks
//! - Host/device message envelopes with token correlation
//! - Result codes and protocol errors

pub mod cobs;
pub mod codec;
pub mod error;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::{FramingError, ProtocolError, ResultCode};
pub use message::{DeviceMessage, HostMessage, Sender};

/// Byte value reserved as block marker and frame terminator.
pub const FRAME_SENTINEL: u8 = 0x00;

/// Maximum number of literal bytes one length-prefixed block can carry.
pub const MAX_BLOCK_LEN: usize = 254;

/// Token value reserved as "no token"; real tokens start at 1.
pub const NO_TOKEN: u32 = 0;
