//! Inbound side: accept loop and per-connection dispatch.
//!
//! The server lifecycle:
//! 1. Bind the listener
//! 2. Accept connections, one task each
//! 3. Per connection: read frames, answer heartbeats, hand everything else to
//!    the [`Dispatcher`] under a server-wide concurrency limit
//! 4. Write replies through the connection's writer task
//!
//! A connection that stays silent for three idle windows, or that sends a
//! malformed frame, is closed. Other connections are unaffected.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rpcwire::{RpcConfig, RpcServer, ServiceDispatcher, ServiceProvider};
//!
//! let provider = Arc::new(ServiceProvider::local(addr));
//! let server = RpcServer::bind(addr, ServiceDispatcher::new(provider), &RpcConfig::default()).await?;
//! server.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::codec::SerializerRegistry;
use crate::config::RpcConfig;
use crate::error::{Result, RpcError};
use crate::protocol::{
    Body, FrameBuffer, Message, MessageCodec, MessageType, ResponseCode, RpcRequest, RpcResponse,
};
use crate::provider::{BoxFuture, ServiceProvider};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Handles decoded inbound messages.
///
/// Returning `Some` sends that message back on the same connection.
pub trait Dispatcher: Send + Sync + 'static {
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<Message>>;
}

/// Dispatcher serving `REQUEST` messages from a [`ServiceProvider`].
#[derive(Clone)]
pub struct ServiceDispatcher {
    provider: Arc<ServiceProvider>,
}

impl ServiceDispatcher {
    pub fn new(provider: Arc<ServiceProvider>) -> Self {
        Self { provider }
    }

    async fn invoke(provider: Arc<ServiceProvider>, request: RpcRequest) -> RpcResponse {
        let Some(service) = provider.lookup(&request.service_name) else {
            tracing::debug!(
                "Request {} for unknown service {}",
                request.request_id,
                request.service_name
            );
            return RpcResponse::fail_with(
                request.request_id,
                ResponseCode::ServiceNotFound,
                format!("service not found: {}", request.service_name),
            );
        };

        match service.call(&request.method_name, request.params).await {
            Ok(value) => RpcResponse::success(request.request_id, Some(value)),
            Err(e) => {
                tracing::debug!(
                    "{}.{} failed: {}",
                    request.service_name,
                    request.method_name,
                    e
                );
                RpcResponse::fail_with(request.request_id, e.response_code(), e.to_string())
            }
        }
    }
}

impl Dispatcher for ServiceDispatcher {
    fn handle(&self, message: Message) -> BoxFuture<'static, Option<Message>> {
        let serializer = message.serializer;
        match message.body {
            Body::Request(request) => {
                let provider = self.provider.clone();
                Box::pin(async move {
                    let response = Self::invoke(provider, request).await;
                    Some(Message::response(response).with_serializer(serializer))
                })
            }
            other => {
                tracing::warn!("Service dispatcher ignoring {:?}", message.message_type);
                let reply = other.request_id().map(|id| {
                    Message::response(RpcResponse::fail_with(
                        id,
                        ResponseCode::ServiceNotFound,
                        "not a register center",
                    ))
                    .with_serializer(serializer)
                });
                Box::pin(async move { reply })
            }
        }
    }
}

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Close a connection after this long without inbound bytes.
    pub reader_idle_timeout: Option<Duration>,
    pub max_concurrent_requests: usize,
    pub max_payload_size: u32,
    pub writer: WriterConfig,
}

impl From<&RpcConfig> for ServerConfig {
    fn from(config: &RpcConfig) -> Self {
        Self {
            reader_idle_timeout: Some(config.reader_idle_timeout()),
            max_concurrent_requests: config.max_concurrent_requests,
            max_payload_size: config.max_payload_size,
            writer: WriterConfig {
                max_pending_frames: config.max_pending_frames,
                channel_capacity: config.channel_capacity,
                idle_timeout: None,
                ..WriterConfig::default()
            },
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<()> {
        let problem = if self.reader_idle_timeout.is_some_and(|idle| idle.is_zero()) {
            Some("reader_idle_timeout must be non-zero")
        } else if self.max_concurrent_requests == 0 {
            Some("max_concurrent_requests must be non-zero")
        } else if self.writer.channel_capacity == 0 {
            Some("channel_capacity must be non-zero")
        } else {
            None
        };

        match problem {
            Some(msg) => Err(RpcError::InvalidConfig(msg.to_string())),
            None => Ok(()),
        }
    }
}

/// A bound, not yet running, server.
pub struct RpcServer {
    listener: TcpListener,
    dispatcher: Arc<dyn Dispatcher>,
    codec: MessageCodec,
    config: ServerConfig,
}

impl RpcServer {
    /// Bind `addr` with the built-in serializers.
    pub async fn bind<D: Dispatcher>(
        addr: SocketAddr,
        dispatcher: D,
        config: &RpcConfig,
    ) -> Result<Self> {
        config.validate()?;
        Self::bind_with(
            addr,
            Arc::new(dispatcher),
            Arc::new(SerializerRegistry::with_defaults()),
            ServerConfig::from(config),
        )
        .await
    }

    pub async fn bind_with(
        addr: SocketAddr,
        dispatcher: Arc<dyn Dispatcher>,
        serializers: Arc<SerializerRegistry>,
        config: ServerConfig,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::with_listener(listener, dispatcher, serializers, config)
    }

    /// Serve on an already bound listener.
    ///
    /// Lets a provider learn its address before the server exists.
    pub fn with_listener(
        listener: TcpListener,
        dispatcher: Arc<dyn Dispatcher>,
        serializers: Arc<SerializerRegistry>,
        config: ServerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let codec = MessageCodec::with_max_payload(serializers, config.max_payload_size);
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            dispatcher,
            codec,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests));

        loop {
            let (stream, peer) = self.listener.accept().await?;
            tracing::debug!("Accepted connection from {}", peer);

            let connection = ServerConnection {
                peer,
                dispatcher: self.dispatcher.clone(),
                codec: self.codec.clone(),
                semaphore: semaphore.clone(),
                config: self.config.clone(),
            };
            tokio::spawn(connection.run(stream));
        }
    }

    /// Run the accept loop in the background.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("Accept loop error: {}", e);
            }
        });
        Ok(ServerHandle { local_addr, task })
    }
}

/// A server running in the background.
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Established connections run until their peers leave.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

struct ServerConnection {
    peer: SocketAddr,
    dispatcher: Arc<dyn Dispatcher>,
    codec: MessageCodec,
    semaphore: Arc<Semaphore>,
    config: ServerConfig,
}

impl ServerConnection {
    async fn run(self, stream: TcpStream) {
        let _ = stream.set_nodelay(true);
        let (mut reader, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());

        let mut frame_buffer = FrameBuffer::with_max_payload(self.codec.max_payload_size());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let read = match self.config.reader_idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, reader.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        tracing::info!("Closing idle connection from {}", self.peer);
                        break;
                    }
                },
                None => reader.read(&mut buf).await,
            };

            let n = match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!("Read error from {}: {}", self.peer, e);
                    break;
                }
            };

            let frames = match frame_buffer.push(&buf[..n]) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::warn!("Protocol violation from {}: {}, closing", self.peer, e);
                    break;
                }
            };

            for frame in frames {
                match frame.message_type() {
                    MessageType::HeartbeatPing => {
                        tracing::trace!("Heartbeat ping from {}", self.peer);
                        let pong = OutboundFrame::heartbeat(MessageType::HeartbeatPong);
                        if let Err(e) = writer.try_send(pong) {
                            tracing::debug!(
                                "Could not answer heartbeat from {}: {}",
                                self.peer,
                                e
                            );
                        }
                    }
                    MessageType::HeartbeatPong => {}
                    _ => match self.codec.decode(&frame) {
                        Ok(message) => self.dispatch(message, &writer),
                        Err(e) => {
                            tracing::warn!(
                                "Undecodable {:?} from {}: {}",
                                frame.message_type(),
                                self.peer,
                                e
                            );
                            if let Some(id) = self.codec.recover_request_id(&frame) {
                                let reply = Message::response(RpcResponse::fail_with(
                                    id,
                                    ResponseCode::SerializationError,
                                    e.to_string(),
                                ))
                                .with_serializer(frame.serializer());
                                self.reply(reply, writer.clone());
                            }
                        }
                    },
                }
            }
        }

        writer_task.abort();
        tracing::debug!("Connection from {} closed", self.peer);
    }

    fn dispatch(&self, message: Message, writer: &WriterHandle) {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    "Request capacity reached, rejecting {:?} from {}",
                    message.request_id(),
                    self.peer
                );
                if let Some(id) = message.request_id() {
                    let busy = Message::response(RpcResponse::fail_with(
                        id,
                        ResponseCode::InternalError,
                        "server busy",
                    ))
                    .with_serializer(message.serializer);
                    self.reply(busy, writer.clone());
                }
                return;
            }
        };

        let dispatcher = self.dispatcher.clone();
        let codec = self.codec.clone();
        let writer = writer.clone();
        let peer = self.peer;

        tokio::spawn(async move {
            // Permit is held until the reply is queued
            let _permit = permit;
            if let Some(reply) = dispatcher.handle(message).await {
                send_reply(&codec, &writer, reply, peer).await;
            }
        });
    }

    fn reply(&self, message: Message, writer: WriterHandle) {
        let codec = self.codec.clone();
        let peer = self.peer;
        tokio::spawn(async move { send_reply(&codec, &writer, message, peer).await });
    }
}

async fn send_reply(codec: &MessageCodec, writer: &WriterHandle, reply: Message, peer: SocketAddr) {
    let bytes = match codec.encode(&reply) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Could not encode reply to {}: {}", peer, e);
            let Some(id) = reply.request_id() else {
                return;
            };
            let fallback = Message::response(RpcResponse::fail_with(
                id,
                ResponseCode::SerializationError,
                e.to_string(),
            ));
            match codec.encode(&fallback) {
                Ok(bytes) => bytes,
                Err(_) => return,
            }
        }
    };

    if let Err(e) = writer.send(bytes.into()).await {
        tracing::debug!("Could not send reply to {}: {}", peer, e);
    }
}
