//! Message <-> frame conversion.
//!
//! [`MessageCodec`] sits between the byte-level [`FrameBuffer`] and the rest
//! of the stack: it turns a [`Message`] into one contiguous frame and a
//! decoded [`Frame`] back into a [`Message`], looking up the payload
//! serializer by the header's tag.
//!
//! [`FrameBuffer`]: super::FrameBuffer

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use super::frame::Frame;
use super::message::{Body, Message};
use super::wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
use crate::codec::SerializerRegistry;
use crate::error::{Result, RpcError};

/// Encodes and decodes messages against a shared serializer registry.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    registry: Arc<SerializerRegistry>,
    max_payload_size: u32,
}

impl MessageCodec {
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self::with_max_payload(registry, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    pub fn with_max_payload(registry: Arc<SerializerRegistry>, max_payload_size: u32) -> Self {
        Self {
            registry,
            max_payload_size,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<SerializerRegistry> {
        &self.registry
    }

    #[inline]
    pub fn max_payload_size(&self) -> u32 {
        self.max_payload_size
    }

    /// Encode a message into a complete frame.
    ///
    /// # Errors
    ///
    /// Serialization errors (unknown tag, body that does not match the
    /// message type, encoder failure, oversized payload). None of them touch
    /// the connection.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        if !message.body.fits(message.message_type) {
            return Err(RpcError::Serialization(format!(
                "{:?} body cannot travel as {:?}",
                body_kind(&message.body),
                message.message_type
            )));
        }

        let payload = if message.message_type.is_heartbeat() {
            Vec::new()
        } else {
            self.registry.resolve(message.serializer)?.encode(&message.body)?
        };

        if payload.len() > self.max_payload_size as usize {
            return Err(RpcError::Serialization(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                self.max_payload_size
            )));
        }

        let header = Header::new(
            message.message_type,
            message.serializer,
            payload.len() as u32,
        );

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_slice(&header.encode());
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode a frame produced by the frame buffer.
    ///
    /// # Errors
    ///
    /// Unknown serializer tag or a payload the serializer rejects.
    pub fn decode(&self, frame: &Frame) -> Result<Message> {
        let header = &frame.header;

        let body = if header.message_type.is_heartbeat() {
            Body::Heartbeat
        } else {
            self.registry
                .resolve(header.serializer)?
                .decode(header.message_type, frame.payload())?
        };

        Ok(Message {
            message_type: header.message_type,
            serializer: header.serializer,
            version: header.version,
            body,
        })
    }

    /// Request id of a frame whose payload would not [`decode`](Self::decode).
    pub fn recover_request_id(&self, frame: &Frame) -> Option<String> {
        if !frame.message_type().expects_response() {
            return None;
        }
        self.registry
            .resolve(frame.serializer())
            .ok()?
            .request_id(frame.payload())
    }
}

fn body_kind(body: &Body) -> &'static str {
    match body {
        Body::Request(_) => "Request",
        Body::Response(_) => "Response",
        Body::Register(_) => "Register",
        Body::Discover(_) => "Discover",
        Body::Heartbeat => "Heartbeat",
    }
}
