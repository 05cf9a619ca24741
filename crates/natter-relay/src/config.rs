//! Relay configuration.

use std::net::{Ipv4Addr, SocketAddr};

use crate::error::RelayError;
use crate::transport::DEFAULT_MAX_FRAME_BYTES;

/// Default bound of each session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 5;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 6080;

/// Chat relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to accept client connections on (default: 0.0.0.0:6080)
    pub listen_addr: SocketAddr,
    /// Capacity of each session's outbound queue (default: 5)
    pub outbound_capacity: usize,
    /// Longest accepted frame in bytes (default: 64 KiB)
    pub max_frame_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl RelayConfig {
    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the maximum frame length.
    pub fn with_max_frame_bytes(mut self, bytes: usize) -> Self {
        self.max_frame_bytes = bytes;
        self
    }

    /// Check the configuration for values the relay cannot run with.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.outbound_capacity == 0 {
            return Err(RelayError::config("outbound_capacity must be at least 1"));
        }
        if self.max_frame_bytes == 0 {
            return Err(RelayError::config("max_frame_bytes must be at least 1"));
        }
        Ok(())
    }
}
