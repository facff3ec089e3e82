//! Encoder and de-framing decoder for the serial wire format.

use crate::cobs;
use crate::error::ProtocolError;
use crate::message::{DeviceMessage, HostMessage};
use crate::FRAME_SENTINEL;
use bytes::{Bytes, BytesMut};

/// Encodes messages into COBS frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a host command into a terminated frame.
    pub fn encode_host(message: &HostMessage) -> Result<Bytes, ProtocolError> {
        let raw = serde_json::to_vec(message)?;
        Ok(cobs::encode(&raw))
    }

    /// Encodes a device message into a terminated frame.
    ///
    /// Used by the device side of the link (tests, simulators).
    pub fn encode_device(message: &DeviceMessage) -> Result<Bytes, ProtocolError> {
        let raw = serde_json::to_vec(message)?;
        Ok(cobs::encode(&raw))
    }
}

/// Stateful de-framer.
///
/// Raw chunks from the transport are appended with [`extend`]; complete
/// frames are sliced out in arrival order as soon as their terminator byte
/// lands in the buffer. Partial frames persist across chunks.
///
/// [`extend`]: Decoder::extend
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Appends a raw chunk to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Slices out the next complete frame (terminator included), if any.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let pos = self.buffer.iter().position(|&b| b == FRAME_SENTINEL)?;
        Some(self.buffer.split_to(pos + 1).freeze())
    }

    /// Decodes the next complete frame as a device message.
    ///
    /// A malformed frame is consumed before the error is returned, so the
    /// caller can log it and keep decoding subsequent frames.
    pub fn decode_device(&mut self) -> Result<Option<DeviceMessage>, ProtocolError> {
        match self.next_frame() {
            Some(frame) => {
                let payload = cobs::decode(&frame)?;
                let message = serde_json::from_slice(&payload)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Decodes the next complete frame as a host command.
    ///
    /// Used by the device side of the link (tests, simulators).
    pub fn decode_host(&mut self) -> Result<Option<HostMessage>, ProtocolError> {
        match self.next_frame() {
            Some(frame) => {
                let payload = cobs::decode(&frame)?;
                let message = serde_json::from_slice(&payload)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
