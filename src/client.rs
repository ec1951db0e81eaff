//! Client builder and call API.
//!
//! The [`RpcClientBuilder`] provides a fluent API over [`RpcConfig`] and the
//! writer settings. The [`RpcClient`] owns the connection manager and the
//! pending-call map, and exposes:
//! 1. `send` / `call` for any correlated message
//! 2. `send_oneway` for messages nobody answers
//! 3. `invoke` for remote service calls, discovering the provider first
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::{RpcClient, ServiceDescriptor};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let client = RpcClient::builder()
//!         .register_center("127.0.0.1:7000".parse().unwrap())
//!         .build()?;
//!
//!     let echo = ServiceDescriptor::new("echo", "1.0");
//!     let response = client.invoke(&echo, "say", json!({"text": "hi"})).await?;
//!     println!("{:?}", response.into_result()?);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::codec::SerializerRegistry;
use crate::config::RpcConfig;
use crate::correlation::{generate_request_id, PendingCalls, ResponseFuture};
use crate::error::{Result, RpcError};
use crate::protocol::{Message, MessageCodec, RpcRequest, RpcResponse};
use crate::provider::ServiceDescriptor;
use crate::register::RegisterClient;
use crate::transport::{ConnectionConfig, ConnectionManager};
use crate::writer::{WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT};

/// Builder for configuring and creating an [`RpcClient`].
pub struct RpcClientBuilder {
    config: RpcConfig,
    serializers: Option<Arc<SerializerRegistry>>,
    backpressure_timeout: Duration,
}

impl RpcClientBuilder {
    pub fn new() -> Self {
        Self {
            config: RpcConfig::default(),
            serializers: None,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }

    /// Start from a loaded configuration.
    pub fn config(mut self, config: RpcConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_center(mut self, addr: SocketAddr) -> Self {
        self.config.register_center = addr;
        self
    }

    /// Default: 5 seconds
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Write-idle window before a heartbeat ping.
    ///
    /// Default: 30 seconds
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Default: 30 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Serializer tag used for outgoing messages.
    pub fn serializer(mut self, tag: u8) -> Self {
        self.config.serializer = tag;
        self
    }

    /// Use a custom serializer registry instead of the built-in one.
    pub fn serializers(mut self, registry: Arc<SerializerRegistry>) -> Self {
        self.serializers = Some(registry);
        self
    }

    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.max_pending_frames = limit;
        self
    }

    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.backpressure_timeout = timeout;
        self
    }

    /// Build the client. No connection is opened until the first call.
    ///
    /// # Errors
    ///
    /// - [`RpcError::InvalidConfig`] for a zero timeout or limit
    /// - [`RpcError::UnknownSerializer`] if the configured serializer tag is
    ///   not registered
    pub fn build(self) -> Result<RpcClient> {
        self.config.validate()?;
        let serializers = self
            .serializers
            .unwrap_or_else(|| Arc::new(SerializerRegistry::with_defaults()));
        serializers.resolve(self.config.serializer)?;

        let codec = MessageCodec::with_max_payload(serializers, self.config.max_payload_size);
        let connection_config = ConnectionConfig {
            connect_timeout: self.config.connect_timeout(),
            writer: WriterConfig {
                max_pending_frames: self.config.max_pending_frames,
                channel_capacity: self.config.channel_capacity,
                backpressure_timeout: self.backpressure_timeout,
                idle_timeout: Some(self.config.idle_timeout()),
            },
        };

        let connections = ConnectionManager::new(codec, PendingCalls::new(), connection_config);

        Ok(RpcClient {
            inner: Arc::new(Inner {
                connections,
                config: self.config,
            }),
        })
    }
}

impl Default for RpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    connections: ConnectionManager,
    config: RpcConfig,
}

/// Handle for making calls. Cheap to clone.
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<Inner>,
}

impl RpcClient {
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    #[inline]
    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// Calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.connections.pending().len()
    }

    /// Send a message that expects a response.
    ///
    /// The call is registered before anything is written, so a response can
    /// never overtake its own registration.
    ///
    /// # Errors
    ///
    /// - [`RpcError::DuplicateRequestId`] if the id is already in flight
    /// - serialization errors; the connection stays usable
    /// - connection errors; the channel is dropped and reconnected on the
    ///   next call
    pub async fn send(&self, addr: SocketAddr, message: Message) -> Result<ResponseFuture> {
        let request_id = match message.request_id() {
            Some(id) if message.message_type.expects_response() => id.to_string(),
            _ => {
                return Err(RpcError::Serialization(format!(
                    "{:?} message does not expect a response",
                    message.message_type
                )))
            }
        };

        let connections = &self.inner.connections;
        let channel = connections.get_channel(addr).await?;
        let future = connections.pending().put_request(
            request_id,
            channel.id(),
            Some(self.inner.config.request_timeout()),
        )?;

        // Dropping `future` on any error below forgets the call
        let bytes = connections.codec().encode(&message)?;

        if let Err(e) = channel.send(bytes.into()).await {
            if matches!(e, RpcError::ConnectionClosed | RpcError::Io(_)) {
                connections.close_channel(&channel).await;
            }
            return Err(e);
        }

        tracing::trace!(
            "Sent {:?} {} to {}",
            message.message_type,
            future.request_id(),
            addr
        );
        Ok(future)
    }

    /// Send a message and wait for its response.
    pub async fn call(&self, addr: SocketAddr, message: Message) -> Result<RpcResponse> {
        self.send(addr, message).await?.wait().await
    }

    /// Send a message nobody answers.
    pub async fn send_oneway(&self, addr: SocketAddr, message: Message) -> Result<()> {
        let connections = &self.inner.connections;
        let channel = connections.get_channel(addr).await?;
        let bytes = connections.codec().encode(&message)?;
        channel.send(bytes.into()).await
    }

    /// Invoke `method` on a remote service, discovering its address through
    /// the register center.
    pub async fn invoke(
        &self,
        descriptor: &ServiceDescriptor,
        method: &str,
        params: Value,
    ) -> Result<RpcResponse> {
        let addr = RegisterClient::new(self.clone())
            .discover(&descriptor.rpc_service_name())
            .await?;
        self.invoke_at(addr, descriptor, method, params).await
    }

    /// Invoke `method` on a provider at a known address.
    pub async fn invoke_at(
        &self,
        addr: SocketAddr,
        descriptor: &ServiceDescriptor,
        method: &str,
        params: Value,
    ) -> Result<RpcResponse> {
        let request = RpcRequest {
            request_id: generate_request_id(),
            service_name: descriptor.rpc_service_name(),
            method_name: method.to_string(),
            params,
        };
        let message = Message::request(request).with_serializer(self.inner.config.serializer);
        self.call(addr, message).await
    }

    /// Close every channel and fail calls still waiting on them.
    ///
    /// The client stays usable; later calls reconnect.
    pub async fn close(&self) {
        self.inner.connections.close().await;
    }
}
