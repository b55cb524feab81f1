//! Streaming V5 frame decoder
//!
//! Accumulates raw TCP bytes and extracts one complete V5 frame at a time.
//! The decoder commits to a frame size only once the first three bytes
//! (start marker + length field) are available, and it never
//! resynchronizes: V5 rides on reliable TCP, so a byte that is not a start
//! marker where one is required means the stream is corrupt and the
//! connection must be dropped. Content validation (checksum, control code)
//! is the parser's job — keeping the decoder to framing decisions lets
//! framing errors surface before content errors.

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::constants::{V5_FRAME_MAX_LEN, V5_LENGTH_ENVELOPE, V5_START_BYTE};
use crate::error::{FrameError, Result};

/// Byte-accumulating frame extractor
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(V5_FRAME_MAX_LEN),
        }
    }

    /// Append received bytes to the input buffer
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes currently buffered and not yet emitted
    pub fn pending(&self) -> usize {
        self.buffer.remaining()
    }

    /// Try to extract the next complete frame
    ///
    /// Returns `Ok(Some(frame))` when a whole frame is buffered (call again
    /// — back-to-back frames in one read are normal), `Ok(None)` when more
    /// bytes are needed, and an error on malformed input. After an error
    /// the transport must be closed; the decoder does not recover.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if self.buffer.len() < 3 {
            return Ok(None);
        }

        let start = self.buffer[0];
        if start != V5_START_BYTE {
            return Err(FrameError::InvalidStartByte(start).into());
        }

        let declared = u16::from_le_bytes([self.buffer[1], self.buffer[2]]);
        if declared < 1 {
            return Err(FrameError::InvalidLength(declared).into());
        }

        let total = declared as usize + V5_LENGTH_ENVELOPE;
        if total > V5_FRAME_MAX_LEN {
            return Err(FrameError::FrameTooLarge(total).into());
        }

        if self.buffer.len() < total {
            trace!("Need more data: have {}, frame is {}", self.buffer.len(), total);
            return Ok(None);
        }

        let frame = self.buffer.split_to(total);
        trace!("Decoded frame: {} bytes, {} buffered", total, self.buffer.len());
        Ok(Some(frame.to_vec()))
    }

    /// Check the buffer at end of stream
    ///
    /// Called after the transport closes and all complete frames have been
    /// drained; leftover bytes mean the peer died mid-frame.
    pub fn finish(&self) -> Result<()> {
        if self.buffer.is_empty() {
            Ok(())
        } else {
            Err(FrameError::IncompleteFrame(self.buffer.len()).into())
        }
    }
}
