//! Wire framing for the engine socket.
//!
//! Every blob travels as one length-prefixed frame:
//!
//! ```text
//! [u32 LE payload length] [payload: blob bytes]
//! ```
//!
//! A zero-length frame carries no message. It is what the liveness probe
//! sends and the decoder skips it silently.

use crate::constants::MAX_FRAME_SIZE;
use crate::error::TransportFault;

/// Encode one payload into a wire frame.
///
/// Returns `[u32 LE length][payload]`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Incremental frame decoder that handles partial reads.
///
/// Feed bytes via [`FrameDecoder::feed`] and extract complete payloads.
/// Handles TCP-style byte stream reassembly.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create a new decoder with empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed bytes into the decoder and extract all complete payloads.
    ///
    /// Incomplete data is buffered for the next call. Keepalive frames are
    /// consumed without producing a payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransportFault::Corrupted`] if a header announces a frame
    /// above [`MAX_FRAME_SIZE`]. The stream cannot be resynchronised after
    /// that, so the decoder must be discarded.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, TransportFault> {
        self.buf.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }

            let length = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if length > MAX_FRAME_SIZE {
                return Err(TransportFault::Corrupted(format!(
                    "frame too large: {length} bytes (max {MAX_FRAME_SIZE})"
                )));
            }

            let total = 4 + length as usize;
            if self.buf.len() < total {
                break;
            }

            if length > 0 {
                payloads.push(self.buf[4..total].to_vec());
            }
            self.buf.drain(..total);
        }

        Ok(payloads)
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop any buffered partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}
