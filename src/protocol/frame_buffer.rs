//! Reassembly of frames from a byte stream.
//!
//! A socket read may deliver half a header, several frames, or a frame and a
//! half. [`FrameBuffer::push`] accepts whatever arrived and hands back every
//! frame that is now complete, keeping the remainder for the next read.
//!
//! The header is validated as soon as its 9 bytes are present, so an
//! oversized or malformed frame is rejected before any of its payload is
//! buffered.

use bytes::BytesMut;

use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use super::Frame;
use crate::error::Result;

const INITIAL_CAPACITY: usize = 16 * 1024;

pub struct FrameBuffer {
    buffer: BytesMut,
    /// Header of the frame whose payload is still arriving.
    pending: Option<Header>,
    max_payload_size: u32,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            pending: None,
            max_payload_size,
        }
    }

    #[inline]
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Append `data` and drain every complete frame.
    ///
    /// # Errors
    ///
    /// Bad magic, an unsupported version, an unknown message type or an
    /// invalid length. The stream cannot be resynchronised after that; the
    /// caller must drop the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Frame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        loop {
            let header = match self.pending.take() {
                Some(header) => header,
                None => match Header::decode(&self.buffer)? {
                    Some(header) => {
                        header.validate(self.max_payload_size)?;
                        let _ = self.buffer.split_to(HEADER_SIZE);
                        header
                    }
                    None => break,
                },
            };

            let payload_length = header.payload_length() as usize;
            if self.buffer.len() < payload_length {
                self.buffer
                    .reserve(payload_length.saturating_sub(self.buffer.len()));
                self.pending = Some(header);
                break;
            }

            let payload = self.buffer.split_to(payload_length).freeze();
            frames.push(Frame::new(header, payload));
        }

        Ok(frames)
    }

    /// Bytes held that do not yet form a frame, excluding a parsed header.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when no partial frame is held.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_none()
    }

    /// Drop any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }

    #[cfg(test)]
    fn awaiting_payload(&self) -> bool {
        self.pending.is_some()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
