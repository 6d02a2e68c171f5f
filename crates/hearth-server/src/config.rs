//! Server configuration.

use std::time::Duration;

use hearth_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for [`HearthServer`](crate::server::HearthServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Per-connection enqueue timeout during broadcast, in milliseconds.
    pub send_timeout_ms: u64,
    /// Ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a connection after this long without a pong, in milliseconds.
    pub pong_timeout_ms: u64,
}

impl ServerConfig {
    /// Per-send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Ping interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Pong timeout as a [`Duration`].
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 90_000,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_message_size: settings.max_message_size,
            send_queue_capacity: settings.send_queue_capacity,
            send_timeout_ms: settings.send_timeout_ms,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            pong_timeout_ms: settings.pong_timeout_ms,
        }
    }
}
