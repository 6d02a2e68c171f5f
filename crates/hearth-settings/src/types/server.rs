//! Network and per-connection settings.

use serde::{Deserialize, Serialize};

/// HTTP/WebSocket listener and connection tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks an ephemeral port).
    pub port: u16,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue_capacity: usize,
    /// Upper bound on a single per-connection enqueue during broadcast.
    pub send_timeout_ms: u64,
    /// Interval between server pings.
    pub heartbeat_interval_ms: u64,
    /// A connection with no pong for this long is closed.
    pub pong_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_message_size: 64 * 1024,
            send_queue_capacity: 256,
            send_timeout_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            pong_timeout_ms: 90_000,
        }
    }
}
