//! Server configuration
//!
//! Loaded from an optional TOML file; every field falls back to its
//! default when absent.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::MAX_PAYLOAD;
use crate::error::ConfigError;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Listening address
    pub bind: SocketAddr,
    /// Operator name: listed first among users, reserved as a nickname,
    /// and used as creator of rooms made from the console
    pub server_name: String,
    /// Maximum authenticated clients
    pub max_clients: usize,
    /// Maximum concurrent rooms
    pub max_rooms: usize,
    /// Messages kept per room
    pub history_limit: usize,
    /// Maximum open sockets, authenticated or not
    pub max_connections: usize,
    /// Upper bound on a single readiness wait
    pub poll_timeout_ms: u64,
    /// Largest declared frame length accepted from a peer
    pub max_payload: usize,
    /// Unsent bytes allowed to pile up for one connection
    pub max_outbound_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 9001)),
            server_name: "Admin".to_string(),
            max_clients: 10,
            max_rooms: 20,
            history_limit: 100,
            max_connections: 64,
            poll_timeout_ms: 250,
            max_payload: MAX_PAYLOAD,
            max_outbound_bytes: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
