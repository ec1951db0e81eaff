//! # rpcwire
//!
//! Binary RPC transport core.
//!
//! This crate lets a process expose named services over TCP and lets remote
//! callers invoke them with async request/response semantics, while a
//! separate register center tracks which address hosts which service.
//!
//! ## Architecture
//!
//! - **Wire protocol**: 9-byte big-endian header followed by a payload
//!   encoded by a pluggable serializer (MsgPack, JSON or plain text by default)
//! - **Connections**: one lazily established channel per endpoint, with
//!   write-idle heartbeats and transparent reconnects
//! - **Correlation**: pending calls keyed by request id in a concurrent map,
//!   resolved from the connection's reader task
//! - **Registry**: services published locally and announced to the register
//!   center over the same transport
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use rpcwire::{
//!     MethodRouter, RegisterClient, RpcClient, RpcConfig, RpcServer, ServiceDescriptor,
//!     ServiceDispatcher, ServiceError, ServiceProvider,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> rpcwire::Result<()> {
//!     let config = RpcConfig::load()?;
//!     let client = RpcClient::builder().config(config.clone()).build()?;
//!
//!     let provider = Arc::new(ServiceProvider::new(
//!         "10.0.0.5:9000".parse().unwrap(),
//!         RegisterClient::new(client.clone()),
//!     ));
//!     provider
//!         .publish(
//!             ServiceDescriptor::new("echo", "1.0"),
//!             MethodRouter::new().method("say", |text: String| async move {
//!                 Ok::<_, ServiceError>(text)
//!             }),
//!         )
//!         .await?;
//!
//!     let server = RpcServer::bind(
//!         "0.0.0.0:9000".parse().unwrap(),
//!         ServiceDispatcher::new(provider),
//!         &config,
//!     )
//!     .await?;
//!     server.run().await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod correlation;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod register;
pub mod server;
pub mod transport;
pub mod writer;

mod client;

pub use client::{RpcClient, RpcClientBuilder};
pub use config::RpcConfig;
pub use correlation::{generate_request_id, PendingCalls, ResponseFuture};
pub use error::{Result, RpcError};
pub use protocol::{Message, ResponseCode, RpcRequest, RpcResponse};
pub use provider::{MethodRouter, Service, ServiceDescriptor, ServiceError, ServiceProvider};
pub use register::{RegisterClient, RegistryEntry};
pub use server::{Dispatcher, RpcServer, ServerHandle, ServiceDispatcher};
