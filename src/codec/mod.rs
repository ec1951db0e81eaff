//! Codec module - pluggable payload serializers.
//!
//! Every frame names the serializer of its payload with a one-byte tag. A
//! [`SerializerRegistry`] binds tags to [`Serializer`] implementations; the
//! built-in ones are:
//!
//! - [`MsgPackSerializer`] - tag [`tags::MSGPACK`], the default
//! - [`JsonSerializer`] - tag [`tags::JSON`]
//! - [`StringSerializer`] - tag [`tags::STRING`], plain text bodies
//!
//! Additional serializers can be registered directly or listed in a static
//! extension manifest and picked up through an [`ExtensionLoader`].
//!
//! # Example
//!
//! ```
//! use rpcwire::codec::{tags, SerializerRegistry};
//!
//! let registry = SerializerRegistry::with_defaults();
//! assert_eq!(registry.resolve(tags::JSON).unwrap().name(), "json");
//! assert!(registry.resolve(42).is_err());
//! ```

mod extension;
mod json;
mod msgpack;
mod string;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, RpcError};
use crate::protocol::{Body, MessageType};

pub use extension::{Extension, ExtensionLoader};
pub use json::{JsonCodec, JsonSerializer};
pub use msgpack::{MsgPackCodec, MsgPackSerializer};
pub use string::StringSerializer;

/// Serializer tags carried in the header's last byte.
pub mod tags {
    pub const MSGPACK: u8 = 1;
    pub const JSON: u8 = 2;
    pub const STRING: u8 = 3;
}

/// Tag used by [`Message`](crate::protocol::Message) constructors.
pub const DEFAULT_SERIALIZER: u8 = tags::MSGPACK;

/// Payload serializer bound to one tag.
///
/// Implementations only provide [`encode`](Serializer::encode) and
/// [`decode`](Serializer::decode); the buffer-oriented operations are derived
/// from them.
pub trait Serializer: Send + Sync + 'static {
    /// Tag written into the header.
    fn tag(&self) -> u8;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Encode a body to payload bytes.
    fn encode(&self, body: &Body) -> Result<Vec<u8>>;

    /// Decode payload bytes as the body shape implied by `message_type`.
    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<Body>;

    /// Best-effort request id of a payload that failed to [`decode`].
    ///
    /// Lets a server answer a malformed request instead of leaving the
    /// caller to time out.
    ///
    /// [`decode`]: Serializer::decode
    fn request_id(&self, _bytes: &[u8]) -> Option<String> {
        None
    }

    /// Encoded size of `body` in bytes.
    fn size(&self, body: &Body) -> Result<usize> {
        Ok(self.encode(body)?.len())
    }

    /// Encode `body` into `buf[offset..offset + length]`.
    ///
    /// Fails if the encoding is not exactly `length` bytes or the window does
    /// not fit in `buf`.
    fn serialize_into(
        &self,
        body: &Body,
        buf: &mut [u8],
        offset: usize,
        length: usize,
    ) -> Result<()> {
        let window = window_mut(buf, offset, length)?;
        let encoded = self.encode(body)?;
        if encoded.len() != length {
            return Err(RpcError::Serialization(format!(
                "{} encoded {} bytes into a {} byte window",
                self.name(),
                encoded.len(),
                length
            )));
        }
        window.copy_from_slice(&encoded);
        Ok(())
    }

    /// Decode the body held in `buf[offset..offset + length]`.
    fn parse(
        &self,
        message_type: MessageType,
        buf: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Body> {
        let end = window_end(buf.len(), offset, length)?;
        self.decode(message_type, &buf[offset..end])
    }
}

fn window_end(buf_len: usize, offset: usize, length: usize) -> Result<usize> {
    offset
        .checked_add(length)
        .filter(|end| *end <= buf_len)
        .ok_or_else(|| {
            RpcError::Serialization(format!(
                "window {offset}+{length} exceeds buffer of {buf_len} bytes"
            ))
        })
}

fn window_mut(buf: &mut [u8], offset: usize, length: usize) -> Result<&mut [u8]> {
    let end = window_end(buf.len(), offset, length)?;
    Ok(&mut buf[offset..end])
}

/// A serde data format a serializer can be built on.
pub(crate) trait SerdeFormat {
    fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>>;
    fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

pub(crate) fn encode_body<F: SerdeFormat>(body: &Body) -> Result<Vec<u8>> {
    match body {
        Body::Request(request) => F::to_vec(request),
        Body::Response(response) => F::to_vec(response),
        Body::Register(command) => F::to_vec(command),
        Body::Discover(query) => F::to_vec(query),
        Body::Heartbeat => Ok(Vec::new()),
    }
}

pub(crate) fn decode_body<F: SerdeFormat>(message_type: MessageType, bytes: &[u8]) -> Result<Body> {
    Ok(match message_type {
        MessageType::Request => Body::Request(F::from_slice(bytes)?),
        MessageType::Response => Body::Response(F::from_slice(bytes)?),
        MessageType::Register => Body::Register(F::from_slice(bytes)?),
        MessageType::Discover => Body::Discover(F::from_slice(bytes)?),
        MessageType::HeartbeatPing | MessageType::HeartbeatPong => Body::Heartbeat,
    })
}

pub(crate) fn request_id_of<F: SerdeFormat>(bytes: &[u8]) -> Option<String> {
    #[derive(serde::Deserialize)]
    struct RequestIdOnly {
        request_id: String,
    }

    F::from_slice::<RequestIdOnly>(bytes)
        .ok()
        .map(|only| only.request_id)
}

fn msgpack() -> Arc<dyn Serializer> {
    Arc::new(MsgPackSerializer)
}

fn json() -> Arc<dyn Serializer> {
    Arc::new(JsonSerializer)
}

fn string() -> Arc<dyn Serializer> {
    Arc::new(StringSerializer)
}

/// Manifest of the serializers compiled into this crate.
pub static SERIALIZER_EXTENSIONS: &[Extension<dyn Serializer>] = &[
    Extension {
        name: "msgpack",
        singleton: true,
        create: msgpack,
    },
    Extension {
        name: "json",
        singleton: true,
        create: json,
    },
    Extension {
        name: "string",
        singleton: true,
        create: string,
    },
];

/// Tag to serializer bindings.
///
/// Shared between every connection of a client or server; reads vastly
/// outnumber registrations.
#[derive(Default)]
pub struct SerializerRegistry {
    serializers: RwLock<HashMap<u8, Arc<dyn Serializer>>>,
}

impl SerializerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in serializers.
    pub fn with_defaults() -> Self {
        Self::discover(&ExtensionLoader::new())
    }

    /// Registry holding every serializer of [`SERIALIZER_EXTENSIONS`] as
    /// instantiated by `loader`.
    pub fn discover(loader: &ExtensionLoader) -> Self {
        Self::discover_from(loader, &[SERIALIZER_EXTENSIONS])
    }

    /// Registry holding the serializers of every manifest in `manifests`,
    /// in order.
    ///
    /// When two extensions claim the same tag the first one wins.
    pub fn discover_from(
        loader: &ExtensionLoader,
        manifests: &[&[Extension<dyn Serializer>]],
    ) -> Self {
        let registry = Self::new();
        for manifest in manifests {
            for serializer in loader.load(manifest) {
                let name = serializer.name();
                if let Err(e) = registry.register(serializer) {
                    tracing::warn!("Skipping serializer extension {}: {}", name, e);
                }
            }
        }
        registry
    }

    /// Bind a serializer to its tag.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateSerializer`] if the tag is taken; the
    /// existing binding is kept.
    pub fn register(&self, serializer: Arc<dyn Serializer>) -> Result<()> {
        let tag = serializer.tag();
        let mut serializers = self
            .serializers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if serializers.contains_key(&tag) {
            return Err(RpcError::DuplicateSerializer(tag));
        }

        tracing::debug!("Registered serializer {} for tag {}", serializer.name(), tag);
        serializers.insert(tag, serializer);
        Ok(())
    }

    /// Serializer bound to `tag`.
    pub fn resolve(&self, tag: u8) -> Result<Arc<dyn Serializer>> {
        self.serializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tag)
            .cloned()
            .ok_or(RpcError::UnknownSerializer(tag))
    }

    /// Registered tags, ascending.
    pub fn tags(&self) -> Vec<u8> {
        let mut tags: Vec<u8> = self
            .serializers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        tags.sort_unstable();
        tags
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
