//! COBS byte-stuffing frame codec.
//!
//! Frame layout (sentinel 0x00 never appears as literal data):
//!
//! ```text
//! +------+----------------+------+----------------+-----+------------+
//! | code | code-1 literal | code | code-1 literal | ... | terminator |
//! | 1B   | bytes          | 1B   | bytes          |     | 0x00       |
//! +------+----------------+------+----------------+-----+------------+
//! ```
//!
//! Each code byte is the length of the following literal run plus one. A code
//! of 0xFF marks a maximal 254-byte run with no implied zero after it; any
//! smaller code implies a zero byte between this block and the next.

use crate::error::FramingError;
use crate::{FRAME_SENTINEL, MAX_BLOCK_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// Encodes a payload into a self-delimiting frame.
///
/// The result contains the sentinel byte only as the final terminator; every
/// payload byte (including zeros) is recoverable with [`decode`]. An empty
/// payload encodes to the fixed two-byte frame `[0x01, 0x00]`.
pub fn encode(payload: &[u8]) -> Bytes {
    // Worst case: one extra code byte per 254 literals, plus terminator.
    let mut out = BytesMut::with_capacity(payload.len() + payload.len() / MAX_BLOCK_LEN + 2);

    let mut code_index = 0;
    let mut code: u8 = 1;
    out.put_u8(0); // placeholder for the first code byte

    for &byte in payload {
        if byte != FRAME_SENTINEL {
            out.put_u8(byte);
            code += 1;
            if code == 0xFF {
                // Maximal run: finalize this block and start the next.
                out[code_index] = code;
                code = 1;
                code_index = out.len();
                out.put_u8(0);
            }
        } else {
            // Literal zero: close the current block, the boundary encodes it.
            out[code_index] = code;
            code = 1;
            code_index = out.len();
            out.put_u8(0);
        }
    }

    out[code_index] = code;
    out.put_u8(FRAME_SENTINEL);
    out.freeze()
}

/// Decodes a frame back into its payload.
///
/// The final byte must be the sentinel terminator. Fails on a zero code byte
/// or a code that claims more bytes than remain before the terminator; the
/// caller is expected to drop the frame and continue with the next one.
pub fn decode(frame: &[u8]) -> Result<Bytes, FramingError> {
    if frame.is_empty() {
        return Ok(Bytes::new());
    }

    let end = frame.len() - 1;
    if frame[end] != FRAME_SENTINEL {
        return Err(FramingError::MissingTerminator);
    }

    let mut out = BytesMut::with_capacity(end);
    let mut i = 0;

    while i < end {
        let code = frame[i];
        i += 1;
        if code == 0 {
            return Err(FramingError::ZeroCode { offset: i - 1 });
        }

        let run = (code - 1) as usize;
        if i + run > end {
            return Err(FramingError::CodeOverrun {
                claimed: run,
                remaining: end - i,
            });
        }

        out.put_slice(&frame[i..i + run]);
        i += run;

        // A zero sits between blocks unless the previous run was maximal or
        // this was the final block.
        if code != 0xFF && i < end {
            out.put_u8(FRAME_SENTINEL);
        }
    }

    Ok(out.freeze())
}
