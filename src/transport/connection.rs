//! Outbound connection manager.
//!
//! Keeps at most one [`Channel`] per remote endpoint. A channel is a TCP
//! stream split into a writer task (with write-idle heartbeats) and a reader
//! task that decodes frames and resolves pending calls.
//!
//! # Failure handling
//!
//! - Protocol error on read: the channel is torn down and every pending call
//!   it owns fails with that protocol error.
//! - EOF or I/O error: the channel is marked inactive and its pending calls
//!   fail with [`RpcError::ConnectionClosed`].
//!
//! Either way the next [`ConnectionManager::get_channel`] for the endpoint
//! connects again.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::correlation::{ConnectionId, PendingCalls};
use crate::error::{Result, RpcError};
use crate::protocol::{Body, Frame, FrameBuffer, MessageCodec, MessageType};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default write-idle window before a heartbeat ping.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Settings for outbound channels.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    /// Writer settings; `idle_timeout` drives the heartbeat.
    pub writer: WriterConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            writer: WriterConfig {
                idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
                ..WriterConfig::default()
            },
        }
    }
}

/// One live connection to a remote endpoint.
///
/// Cheap to clone; all clones drive the same socket.
#[derive(Clone)]
pub struct Channel {
    id: ConnectionId,
    addr: SocketAddr,
    writer: WriterHandle,
    active: Arc<AtomicBool>,
    reader_task: AbortHandle,
    writer_task: AbortHandle,
}

impl Channel {
    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the socket is still usable for writing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.writer.is_closed()
    }

    /// Queue an encoded frame.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_active() {
            return Err(RpcError::ConnectionClosed);
        }
        self.writer.send(frame).await
    }

    fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Per-endpoint slot. Its lock is held while connecting, so callers of one
/// endpoint share a single connect while other endpoints proceed.
type Slot = Arc<Mutex<Option<Channel>>>;

/// Lazily connects and reuses one channel per endpoint.
pub struct ConnectionManager {
    channels: DashMap<SocketAddr, Slot>,
    codec: MessageCodec,
    pending: PendingCalls,
    config: ConnectionConfig,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(codec: MessageCodec, pending: PendingCalls, config: ConnectionConfig) -> Self {
        Self {
            channels: DashMap::new(),
            codec,
            pending,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    #[inline]
    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    fn slot(&self, addr: SocketAddr) -> Slot {
        // Clone out so the shard lock is released before awaiting
        self.channels.entry(addr).or_default().clone()
    }

    /// Active channel to `addr`, connecting if there is none.
    ///
    /// A slow connect only holds up callers of the same endpoint.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectTimeout`] past the connect timeout, or the I/O
    /// error from `connect`.
    pub async fn get_channel(&self, addr: SocketAddr) -> Result<Channel> {
        let slot = self.slot(addr);
        let mut current = slot.lock().await;

        if let Some(channel) = current.as_ref() {
            if channel.is_active() {
                return Ok(channel.clone());
            }
            tracing::info!("Channel {} to {} is inactive, reconnecting", channel.id, addr);
            channel.shutdown();
            *current = None;
        }

        let channel = self.connect(addr).await?;
        *current = Some(channel.clone());
        Ok(channel)
    }

    /// Tear down `channel`, failing its pending calls.
    ///
    /// A newer channel to the same endpoint is left alone.
    pub async fn close_channel(&self, channel: &Channel) {
        let slot = match self.channels.get(&channel.addr) {
            Some(slot) => slot.value().clone(),
            None => return,
        };

        {
            let mut current = slot.lock().await;
            if current.as_ref().map(Channel::id) == Some(channel.id) {
                *current = None;
            }
        }

        channel.shutdown();
        self.pending
            .fail_connection(channel.id, || RpcError::ConnectionClosed);
    }

    /// Tear down every channel.
    ///
    /// The manager stays usable; the next `get_channel` reconnects.
    pub async fn close(&self) {
        let slots: Vec<Slot> = self
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for slot in slots {
            let Some(channel) = slot.lock().await.take() else {
                continue;
            };
            channel.shutdown();
            let failed = self
                .pending
                .fail_connection(channel.id, || RpcError::ConnectionClosed);
            tracing::debug!(
                "Closed channel {} to {} ({} pending call(s) failed)",
                channel.id,
                channel.addr,
                failed
            );
        }
    }

    async fn connect(&self, addr: SocketAddr) -> Result<Channel> {
        let timeout = self.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::ConnectTimeout { addr, timeout })??;
        stream.set_nodelay(true)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        let writer_task = writer_task.abort_handle();
        let active = Arc::new(AtomicBool::new(true));

        let reader = ChannelReader {
            id,
            addr,
            codec: self.codec.clone(),
            pending: self.pending.clone(),
            writer: writer.clone(),
            active: active.clone(),
            writer_task: writer_task.clone(),
        };
        let reader_task = tokio::spawn(reader.run(read_half)).abort_handle();

        tracing::info!("Connected channel {} to {}", id, addr);

        Ok(Channel {
            id,
            addr,
            writer,
            active,
            reader_task,
            writer_task,
        })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        for entry in self.channels.iter() {
            // A slot locked here belongs to a connect that is being dropped too
            if let Ok(current) = entry.value().try_lock() {
                if let Some(channel) = current.as_ref() {
                    channel.shutdown();
                }
            }
        }
    }
}

/// Reader half of a channel.
struct ChannelReader {
    id: ConnectionId,
    addr: SocketAddr,
    codec: MessageCodec,
    pending: PendingCalls,
    writer: WriterHandle,
    active: Arc<AtomicBool>,
    writer_task: AbortHandle,
}

impl ChannelReader {
    async fn run(self, mut reader: OwnedReadHalf) {
        let mut frame_buffer = FrameBuffer::with_max_payload(self.codec.max_payload_size());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let outcome: Result<()> = loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(RpcError::Io(e)),
            };

            match frame_buffer.push(&buf[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        self.dispatch(frame);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.active.store(false, Ordering::Release);

        match outcome {
            Err(e) if e.is_protocol() => {
                tracing::warn!(
                    "Protocol violation on channel {} to {}: {}, closing",
                    self.id,
                    self.addr,
                    e
                );
                self.writer_task.abort();
                self.pending
                    .fail_connection(self.id, || e.duplicate_protocol());
            }
            Err(e) => {
                tracing::debug!("Channel {} to {} failed: {}", self.id, self.addr, e);
                self.pending
                    .fail_connection(self.id, || RpcError::ConnectionClosed);
            }
            Ok(()) => {
                tracing::debug!("Channel {} to {} closed by peer", self.id, self.addr);
                self.pending
                    .fail_connection(self.id, || RpcError::ConnectionClosed);
            }
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame.message_type() {
            MessageType::HeartbeatPing => {
                tracing::trace!("Heartbeat ping from {}", self.addr);
                let pong = OutboundFrame::heartbeat(MessageType::HeartbeatPong);
                if let Err(e) = self.writer.try_send(pong) {
                    tracing::debug!("Could not answer heartbeat from {}: {}", self.addr, e);
                }
            }
            MessageType::HeartbeatPong => {
                tracing::trace!("Heartbeat pong from {}", self.addr);
            }
            MessageType::Response => match self.codec.decode(&frame) {
                Ok(message) => {
                    if let Body::Response(response) = message.body {
                        self.pending.complete(response);
                    }
                }
                Err(e) => {
                    tracing::warn!("Undecodable response from {}: {}", self.addr, e);
                }
            },
            other => {
                tracing::warn!("Unexpected {:?} frame from {}, dropping", other, self.addr);
            }
        }
    }
}
