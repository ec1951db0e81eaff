//! Runtime configuration.
//!
//! Values only: where the register center lives and the timeouts and limits
//! the transport runs with. Loaded from a TOML file overlaid with
//! `RPCWIRE_`-prefixed environment variables.
//!
//! ```toml
//! register_center = "10.0.0.1:7000"
//! connect_timeout_ms = 2000
//! serializer = 2
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::codec::DEFAULT_SERIALIZER;
use crate::error::{Result, RpcError};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::writer::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_FRAMES};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RPCWIRE_";

/// Default register center address.
pub const DEFAULT_REGISTER_CENTER: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 7000);

/// Default maximum concurrent requests per server.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    pub register_center: SocketAddr,
    pub connect_timeout_ms: u64,
    /// Write-idle window before a heartbeat; servers close after 3x this.
    pub idle_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_payload_size: u32,
    /// Serializer tag for outgoing messages.
    pub serializer: u8,
    pub channel_capacity: usize,
    pub max_pending_frames: usize,
    pub max_concurrent_requests: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            register_center: DEFAULT_REGISTER_CENTER,
            connect_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
            request_timeout_ms: 30_000,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            serializer: DEFAULT_SERIALIZER,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
        }
    }
}

impl RpcConfig {
    /// Load from `rpcwire.toml` in the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from("rpcwire.toml")
    }

    /// Load from a TOML file, overridden by `RPCWIRE_*` environment variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(RpcError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Configuration file not found: {}", path.display()),
            )));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config = figment.extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config = Figment::new()
            .merge(Toml::string(content))
            .extract::<Self>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the transport cannot run with.
    ///
    /// Every timeout and limit must be non-zero.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("connect_timeout_ms", self.connect_timeout_ms == 0),
            ("idle_timeout_ms", self.idle_timeout_ms == 0),
            ("request_timeout_ms", self.request_timeout_ms == 0),
            ("max_payload_size", self.max_payload_size == 0),
            ("channel_capacity", self.channel_capacity == 0),
            ("max_pending_frames", self.max_pending_frames == 0),
            ("max_concurrent_requests", self.max_concurrent_requests == 0),
        ];

        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(RpcError::InvalidConfig(format!("{field} must be non-zero"))),
            None => Ok(()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// How long a server tolerates a silent connection.
    pub fn reader_idle_timeout(&self) -> Duration {
        self.idle_timeout() * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tags;

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
        assert_eq!(config.reader_idle_timeout(), Duration::from_secs(90));
        assert_eq!(config.serializer, tags::MSGPACK);
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let config = RpcConfig::parse(
            r#"
            register_center = "10.0.0.1:7000"
            request_timeout_ms = 250
            serializer = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.register_center, "10.0.0.1:7000".parse().unwrap());
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.serializer, tags::JSON);
        assert_eq!(config.connect_timeout_ms, 5_000);
    }

    #[test]
    fn test_parse_rejects_bad_address() {
        let err = RpcConfig::parse(r#"register_center = "not an address""#).unwrap_err();
        assert!(matches!(err, RpcError::Config(_)));
    }

    #[test]
    fn test_load_from_missing_file() {
        let err = RpcConfig::load_from("/nonexistent/rpcwire.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let path = std::env::temp_dir().join(format!("rpcwire-{}.toml", std::process::id()));
        std::fs::write(&path, "idle_timeout_ms = 1000\nmax_payload_size = 4096\n").unwrap();
        std::env::set_var("RPCWIRE_MAX_PAYLOAD_SIZE", "2048");

        let config = RpcConfig::load_from(&path).unwrap();

        std::env::remove_var("RPCWIRE_MAX_PAYLOAD_SIZE");
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.idle_timeout(), Duration::from_secs(1));
        assert_eq!(config.max_payload_size, 2048);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for (toml, field) in [
            ("idle_timeout_ms = 0", "idle_timeout_ms"),
            ("channel_capacity = 0", "channel_capacity"),
            ("max_concurrent_requests = 0", "max_concurrent_requests"),
        ] {
            let err = RpcConfig::parse(toml).unwrap_err();
            assert!(
                matches!(err, RpcError::InvalidConfig(ref msg) if msg.contains(field)),
                "{toml}: {err}"
            );
        }
        assert!(RpcConfig::default().validate().is_ok());
    }
}
