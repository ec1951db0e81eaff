//! Error types for rpcwire.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Main error type for all rpcwire operations.
///
/// Variants fall into five families: protocol (connection-fatal),
/// serialization (fails a single call), connection, correlation and registry.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Frame did not start with the protocol magic.
    #[error("Protocol mismatch: bad magic 0x{magic:04X}")]
    ProtocolMismatch { magic: u16 },

    /// Frame carries a protocol version this build does not speak.
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Frame carries an unknown message type byte.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    /// Other framing violation (bad length, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No serializer is bound to the tag.
    #[error("Unknown serializer tag: {0}")]
    UnknownSerializer(u8),

    /// A serializer is already bound to the tag.
    #[error("Duplicate serializer tag: {0}")]
    DuplicateSerializer(u8),

    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting to the endpoint took longer than the configured bound.
    #[error("Connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    /// Connection closed before the call completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No response arrived within the request timeout.
    #[error("Request timed out")]
    Timeout,

    /// Writer queue stayed full past the backpressure timeout.
    #[error("Backpressure timeout")]
    Backpressure,

    /// A call with this request id is already in flight.
    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    /// Service was never published in this process.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// Register center has no address for the service.
    #[error("Discovery miss for service: {0}")]
    DiscoveryMiss(String),

    /// Remote side answered with a non-success response code.
    #[error("Remote error {code}: {message}")]
    Remote { code: u16, message: String },

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// Configuration loaded but holds an unusable value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RpcError {
    /// Errors that poison the connection they occurred on.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            RpcError::ProtocolMismatch { .. }
                | RpcError::UnsupportedVersion(_)
                | RpcError::UnknownMessageType(_)
                | RpcError::Protocol(_)
        )
    }

    /// Errors that fail a single call and leave the connection usable.
    pub fn is_serialization(&self) -> bool {
        matches!(
            self,
            RpcError::Serialization(_)
                | RpcError::MsgPackEncode(_)
                | RpcError::MsgPackDecode(_)
                | RpcError::Json(_)
                | RpcError::UnknownSerializer(_)
        )
    }

    /// Transport failures, including a call that timed out waiting.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::ConnectTimeout { .. }
                | RpcError::ConnectionClosed
                | RpcError::Timeout
                | RpcError::Backpressure
        )
    }

    /// Rebuild a protocol error for fan-out to every call on a connection.
    pub(crate) fn duplicate_protocol(&self) -> RpcError {
        match self {
            RpcError::ProtocolMismatch { magic } => RpcError::ProtocolMismatch { magic: *magic },
            RpcError::UnsupportedVersion(v) => RpcError::UnsupportedVersion(*v),
            RpcError::UnknownMessageType(t) => RpcError::UnknownMessageType(*t),
            other => RpcError::Protocol(other.to_string()),
        }
    }
}

impl From<figment::Error> for RpcError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(RpcError::ProtocolMismatch { magic: 0 }.is_protocol());
        assert!(RpcError::UnsupportedVersion(9).is_protocol());
        assert!(RpcError::Serialization("x".into()).is_serialization());
        assert!(RpcError::Timeout.is_connection());
        assert!(!RpcError::DuplicateRequestId("r1".into()).is_connection());
    }

    #[test]
    fn test_duplicate_protocol_keeps_variant() {
        let err = RpcError::ProtocolMismatch { magic: 0xBEEF };
        assert!(matches!(
            err.duplicate_protocol(),
            RpcError::ProtocolMismatch { magic: 0xBEEF }
        ));
        let io = RpcError::Protocol("bad length".into());
        assert!(io.duplicate_protocol().to_string().contains("bad length"));
    }
}
