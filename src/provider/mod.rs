//! Provider module - services hosted by this process.
//!
//! Provides:
//! - [`Service`] - the object a request is dispatched to
//! - [`MethodRouter`] - a service built from typed per-method handlers
//! - [`ServiceProvider`] - publishes services locally and to the register center
//!
//! # Example
//!
//! ```ignore
//! use rpcwire::provider::{MethodRouter, ServiceDescriptor, ServiceError, ServiceProvider};
//!
//! let echo = MethodRouter::new()
//!     .method("say", |text: String| async move { Ok::<_, ServiceError>(text) });
//!
//! provider.publish(ServiceDescriptor::new("echo", "1.0"), echo).await?;
//! ```

mod registry;
mod service;

pub use registry::{advertised_address, ServiceDescriptor, ServiceProvider, ServiceRegistration};
pub use service::{BoxFuture, MethodRouter, Service, ServiceError};
