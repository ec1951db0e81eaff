//! Wire format encoding and decoding.
//!
//! Implements the 9-byte header format:
//! ```text
//! ┌────────┬─────────┬─────────────┬──────────┬────────────┬─────────────┐
//! │ Magic  │ Version │ Full length │ Msg type │ Serializer │ Payload ... │
//! │ 2 bytes│ 1 byte  │ 4 bytes     │ 1 byte   │ 1 byte     │             │
//! │ u16 BE │         │ u32 BE      │          │            │             │
//! └────────┴─────────┴─────────────┴──────────┴────────────┴─────────────┘
//! ```
//!
//! `full_length` counts the header itself plus the payload, so a heartbeat
//! frame has `full_length == HEADER_SIZE`.

use crate::error::{Result, RpcError};

/// Header size in bytes (fixed, exactly 9).
pub const HEADER_SIZE: usize = 9;

/// Protocol magic, "RW".
pub const MAGIC: u16 = 0x5257;

/// The only protocol version this build speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default maximum payload size (8 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 8 * 1024 * 1024;

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Service invocation.
    Request = 1,
    /// Answer to a request, register or discover message.
    Response = 2,
    /// Idle-triggered liveness check.
    HeartbeatPing = 3,
    /// Answer to a ping.
    HeartbeatPong = 4,
    /// Register or unregister a service address.
    Register = 5,
    /// Resolve a service name to an address.
    Discover = 6,
}

impl MessageType {
    /// Parse the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Request),
            2 => Some(Self::Response),
            3 => Some(Self::HeartbeatPing),
            4 => Some(Self::HeartbeatPong),
            5 => Some(Self::Register),
            6 => Some(Self::Discover),
            _ => None,
        }
    }

    /// Wire byte for this type.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Heartbeat frames never carry a payload.
    #[inline]
    pub fn is_heartbeat(self) -> bool {
        matches!(self, Self::HeartbeatPing | Self::HeartbeatPong)
    }

    /// Whether the sender waits for a correlated response.
    #[inline]
    pub fn expects_response(self) -> bool {
        matches!(self, Self::Request | Self::Register | Self::Discover)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol magic (must equal [`MAGIC`]).
    pub magic: u16,
    /// Protocol version.
    pub version: u8,
    /// Header plus payload length in bytes.
    pub full_length: u32,
    /// Message type.
    pub message_type: MessageType,
    /// Serializer tag used for the payload.
    pub serializer: u8,
}

impl Header {
    /// Create a header for a payload of `payload_length` bytes.
    pub fn new(message_type: MessageType, serializer: u8, payload_length: u32) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            full_length: payload_length + HEADER_SIZE as u32,
            message_type,
            serializer,
        }
    }

    /// Payload length implied by `full_length`.
    #[inline]
    pub fn payload_length(&self) -> u32 {
        self.full_length.saturating_sub(HEADER_SIZE as u32)
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rpcwire::protocol::{Header, MessageType, HEADER_SIZE};
    ///
    /// let header = Header::new(MessageType::Request, 1, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), HEADER_SIZE);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (9 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&self.magic.to_be_bytes());
        buf[2] = self.version;
        buf[3..7].copy_from_slice(&self.full_length.to_be_bytes());
        buf[7] = self.message_type.as_u8();
        buf[8] = self.serializer;
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if the buffer is too short. Magic and version are
    /// checked before anything else so a foreign byte stream is rejected as
    /// early as possible.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(RpcError::ProtocolMismatch { magic });
        }

        let version = buf[2];
        if version != PROTOCOL_VERSION {
            return Err(RpcError::UnsupportedVersion(version));
        }

        let message_type =
            MessageType::from_u8(buf[7]).ok_or(RpcError::UnknownMessageType(buf[7]))?;

        Ok(Some(Self {
            magic,
            version,
            full_length: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
            message_type,
            serializer: buf[8],
        }))
    }

    /// Validate length fields.
    ///
    /// Checks:
    /// - `full_length` covers at least the header
    /// - Payload length doesn't exceed max
    /// - Heartbeats carry no payload
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if (self.full_length as usize) < HEADER_SIZE {
            return Err(RpcError::Protocol(format!(
                "Full length {} is shorter than the header",
                self.full_length
            )));
        }

        if self.payload_length() > max_payload_size {
            return Err(RpcError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length(),
                max_payload_size
            )));
        }

        if self.message_type.is_heartbeat() && self.payload_length() != 0 {
            return Err(RpcError::Protocol(
                "Heartbeat frames must not carry a payload".to_string(),
            ));
        }

        Ok(())
    }
}
