//! Server configuration from environment variables.
//!
//! # Environment Variables
//!
//! - `NATTER_LISTEN_ADDR`: Address to accept clients on. Default: `0.0.0.0:6080`
//! - `NATTER_OUTBOUND_CAPACITY`: Per-session outbound queue bound. Default: `5`
//! - `NATTER_MAX_FRAME_BYTES`: Longest accepted frame. Default: `65536`
//! - `NATTER_LOG_FORMAT`: `compact`, `pretty` or `json`. Default: `compact`

use std::str::FromStr;

use natter_relay::RelayConfig;
use tracing::info;

use crate::telemetry::LogFormat;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Relay settings
    pub relay: RelayConfig,
    /// Log output format
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load server configuration from environment variables.
    pub fn from_env() -> Result<Self, natter_relay::RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load server configuration through a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, natter_relay::RelayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut relay = RelayConfig::default();

        if let Some(addr) = parse_var(&lookup, "NATTER_LISTEN_ADDR")? {
            relay = relay.with_listen_addr(addr);
        }
        if let Some(capacity) = parse_var(&lookup, "NATTER_OUTBOUND_CAPACITY")? {
            relay = relay.with_outbound_capacity(capacity);
        }
        if let Some(bytes) = parse_var(&lookup, "NATTER_MAX_FRAME_BYTES")? {
            relay = relay.with_max_frame_bytes(bytes);
        }
        relay.validate()?;

        let log_format = lookup("NATTER_LOG_FORMAT")
            .map(|v| LogFormat::parse(&v))
            .unwrap_or_default();

        Ok(Self { relay, log_format })
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Listen address: {}", self.relay.listen_addr);
        info!("Outbound queue capacity: {}", self.relay.outbound_capacity);
        info!("Max frame size: {} bytes", self.relay.max_frame_bytes);
        info!("Log format: {:?}", self.log_format);
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, natter_relay::RelayError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            natter_relay::RelayError::config(format!("invalid {}={:?}: {}", key, raw, e))
        }),
    }
}
