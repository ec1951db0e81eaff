//! Transport module - TCP channels to remote endpoints.
//!
//! Provides:
//! - [`ConnectionManager`] - one reusable channel per endpoint
//! - [`Channel`] - a connected socket with its reader and writer tasks

mod connection;

pub use connection::{
    Channel, ConnectionConfig, ConnectionManager, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
};
