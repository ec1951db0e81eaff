//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use rpcwire::protocol::{Frame, Header, MessageType};
//! use bytes::Bytes;
//!
//! let header = Header::new(MessageType::Response, 1, 5);
//! let frame = Frame::new(header, Bytes::from_static(b"hello"));
//!
//! assert_eq!(frame.message_type(), MessageType::Response);
//! assert_eq!(frame.payload(), b"hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Header, MessageType, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Get the message type.
    #[inline]
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Get the serializer tag.
    #[inline]
    pub fn serializer(&self) -> u8 {
        self.header.serializer
    }

    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        self.header.message_type.is_heartbeat()
    }
}

/// Build a complete frame as a single buffer.
///
/// The header's `full_length` is taken as-is; callers build it with
/// [`Header::new`] so it matches `payload.len()`.
///
/// # Example
///
/// ```
/// use rpcwire::protocol::{build_frame, Header, MessageType, HEADER_SIZE};
///
/// let header = Header::new(MessageType::Request, 1, 5);
/// let bytes = build_frame(&header, b"hello");
/// assert_eq!(bytes.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(header: &Header, payload: &[u8]) -> Bytes {
    debug_assert_eq!(header.payload_length() as usize, payload.len());
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let header = Header::new(MessageType::Request, 2, 5);
        let frame = Frame::new(header, Bytes::from_static(b"hello"));

        assert_eq!(frame.message_type(), MessageType::Request);
        assert_eq!(frame.serializer(), 2);
        assert_eq!(frame.payload_len(), 5);
        assert!(!frame.is_heartbeat());
    }

    #[test]
    fn test_build_frame_heartbeat_is_header_only() {
        let header = Header::new(MessageType::HeartbeatPing, 1, 0);
        let bytes = build_frame(&header, b"");

        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = Header::decode(&bytes).unwrap().unwrap();
        assert_eq!(parsed.full_length as usize, HEADER_SIZE);
    }

    #[test]
    fn test_build_frame_roundtrip() {
        use super::super::FrameBuffer;

        let payload = b"0123456789";
        let header = Header::new(MessageType::Discover, 1, payload.len() as u32);
        let bytes = build_frame(&header, payload);

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type(), MessageType::Discover);
        assert_eq!(frames[0].payload(), payload);
    }
}
