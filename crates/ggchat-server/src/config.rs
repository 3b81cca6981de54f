//! Server configuration.

use std::time::Duration;

use ggchat_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum admitted connections; further upgrades close with 1013.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub send_queue_capacity: usize,
    /// Transport write timeout in milliseconds.
    pub send_timeout_ms: u64,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Heartbeat timeout in seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Write timeout as a `Duration`.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Ping interval as a `Duration`, never zero.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Liveness timeout as a `Duration`.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            max_connections: s.max_connections,
            send_queue_capacity: s.send_queue_capacity,
            send_timeout_ms: s.send_timeout_ms,
            heartbeat_interval_secs: s.heartbeat_interval_secs,
            heartbeat_timeout_secs: s.heartbeat_timeout_secs,
            max_message_size: s.max_message_size,
        }
    }
}
