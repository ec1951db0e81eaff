//! Application-level messages carried inside frames.
//!
//! A [`Message`] is what callers build and what the [`MessageCodec`]
//! produces on receive. Its [`Body`] is one of the DTOs below; the request
//! identifier lives inside the DTO so that it survives any serializer.
//!
//! [`MessageCodec`]: super::MessageCodec

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::wire_format::{MessageType, PROTOCOL_VERSION};
use crate::codec::DEFAULT_SERIALIZER;
use crate::error::RpcError;

/// Outcome of a call as reported by the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ResponseCode {
    Success,
    ServiceNotFound,
    SerializationError,
    InternalError,
}

impl ResponseCode {
    /// Stable numeric code used on the wire.
    pub const fn code(self) -> u16 {
        match self {
            Self::Success => 200,
            Self::ServiceNotFound => 404,
            Self::SerializationError => 400,
            Self::InternalError => 500,
        }
    }

    /// Default human-readable message.
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "remote call succeeded",
            Self::ServiceNotFound => "service not found",
            Self::SerializationError => "payload could not be decoded",
            Self::InternalError => "remote call failed",
        }
    }
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> Self {
        code.code()
    }
}

impl TryFrom<u16> for ResponseCode {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            200 => Ok(Self::Success),
            404 => Ok(Self::ServiceNotFound),
            400 => Ok(Self::SerializationError),
            500 => Ok(Self::InternalError),
            other => Err(format!("unknown response code {other}")),
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.message())
    }
}

/// Invocation of a method on a published service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub request_id: String,
    /// Fully qualified name, see [`ServiceDescriptor::rpc_service_name`].
    ///
    /// [`ServiceDescriptor::rpc_service_name`]: crate::provider::ServiceDescriptor::rpc_service_name
    pub service_name: String,
    pub method_name: String,
    #[serde(default)]
    pub params: Value,
}

/// Answer to a request, register or discover message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub request_id: String,
    pub response_code: ResponseCode,
    pub response_message: String,
    /// Absent on the wire when `None`; an explicit null is `Some(Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_value"
    )]
    pub data: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcResponse {
    /// Successful response carrying `data`.
    pub fn success(request_id: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            request_id: request_id.into(),
            response_code: ResponseCode::Success,
            response_message: ResponseCode::Success.message().to_string(),
            data,
        }
    }

    /// Failed response with the default message for `code`.
    pub fn fail(request_id: impl Into<String>, code: ResponseCode) -> Self {
        Self::fail_with(request_id, code, code.message())
    }

    /// Failed response with a custom message.
    pub fn fail_with(
        request_id: impl Into<String>,
        code: ResponseCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            response_code: code,
            response_message: message.into(),
            data: None,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.response_code == ResponseCode::Success
    }

    /// The carried data, or [`RpcError::Remote`] for a failed response.
    pub fn into_result(self) -> crate::error::Result<Option<Value>> {
        if self.is_success() {
            Ok(self.data)
        } else {
            Err(RpcError::Remote {
                code: self.response_code.code(),
                message: self.response_message,
            })
        }
    }
}

/// Whether a [`RegistryCommand`] adds or removes an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryAction {
    Register,
    Unregister,
}

/// Register-center command carried in `REGISTER` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCommand {
    pub request_id: String,
    pub action: RegistryAction,
    pub service_name: String,
    pub address: SocketAddr,
}

/// Register-center lookup carried in `DISCOVER` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    pub request_id: String,
    pub service_name: String,
}

/// Payload of a message, one variant per data shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Request(RpcRequest),
    Response(RpcResponse),
    Register(RegistryCommand),
    Discover(DiscoveryQuery),
    /// Heartbeat sentinel; encodes to zero payload bytes.
    Heartbeat,
}

impl Body {
    /// Request identifier, if the body carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Body::Request(r) => Some(&r.request_id),
            Body::Response(r) => Some(&r.request_id),
            Body::Register(c) => Some(&c.request_id),
            Body::Discover(q) => Some(&q.request_id),
            Body::Heartbeat => None,
        }
    }

    /// Whether this body may travel in a frame of `message_type`.
    pub fn fits(&self, message_type: MessageType) -> bool {
        matches!(
            (self, message_type),
            (Body::Request(_), MessageType::Request)
                | (Body::Response(_), MessageType::Response)
                | (Body::Register(_), MessageType::Register)
                | (Body::Discover(_), MessageType::Discover)
                | (
                    Body::Heartbeat,
                    MessageType::HeartbeatPing | MessageType::HeartbeatPong
                )
        )
    }
}

/// Logical envelope handed to the codec.
///
/// Built by the caller, immutable once handed over.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub message_type: MessageType,
    pub serializer: u8,
    pub version: u8,
    pub body: Body,
}

impl Message {
    fn with_body(message_type: MessageType, body: Body) -> Self {
        Self {
            message_type,
            serializer: DEFAULT_SERIALIZER,
            version: PROTOCOL_VERSION,
            body,
        }
    }

    pub fn request(request: RpcRequest) -> Self {
        Self::with_body(MessageType::Request, Body::Request(request))
    }

    pub fn response(response: RpcResponse) -> Self {
        Self::with_body(MessageType::Response, Body::Response(response))
    }

    pub fn register(command: RegistryCommand) -> Self {
        Self::with_body(MessageType::Register, Body::Register(command))
    }

    pub fn discover(query: DiscoveryQuery) -> Self {
        Self::with_body(MessageType::Discover, Body::Discover(query))
    }

    pub fn ping() -> Self {
        Self::with_body(MessageType::HeartbeatPing, Body::Heartbeat)
    }

    pub fn pong() -> Self {
        Self::with_body(MessageType::HeartbeatPong, Body::Heartbeat)
    }

    /// Use a different serializer tag for the payload.
    pub fn with_serializer(mut self, tag: u8) -> Self {
        self.serializer = tag;
        self
    }

    #[inline]
    pub fn request_id(&self) -> Option<&str> {
        self.body.request_id()
    }
}
