//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file may name only the fields it changes.

mod auth;
mod server;

pub use auth::*;
pub use server::*;

use hearth_core::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type for the Hearth server.
///
/// Loaded from `~/.hearth/settings.json` with defaults applied for missing
/// fields. Environment variables override specific values. Example:
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "auth": { "jwtSecret": "change-me" },
///   "directory": { "membershipsPath": "/etc/hearth/memberships.json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HearthSettings {
    /// Listener and connection tuning.
    pub server: ServerSettings,
    /// Bearer token verification.
    pub auth: AuthSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Family membership source.
    pub directory: DirectorySettings,
}

impl HearthSettings {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret must not be empty".to_string(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be at least 1".to_string(),
            ));
        }
        if self.server.send_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendTimeoutMs must be at least 1".to_string(),
            ));
        }
        if self.server.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalMs must be at least 1".to_string(),
            ));
        }
        if self.server.pong_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.pongTimeoutMs ({}) must not be shorter than server.heartbeatIntervalMs ({})",
                self.server.pong_timeout_ms, self.server.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Where family memberships come from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// JSON file mapping user ids to family ids. Empty directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memberships_path: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
