//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HearthSettings::default()`]
//! 2. If `~/.hearth/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `HEARTH_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::HearthSettings;

/// Resolve the path to the settings file (`~/.hearth/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".hearth").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HearthSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<HearthSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<HearthSettings> {
    let defaults = serde_json::to_value(HearthSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `HEARTH_*` environment variable overrides to loaded settings.
///
/// Integers must parse and fall within range; invalid values are ignored
/// with a warning (falling back to file/default).
pub fn apply_env_overrides(settings: &mut HearthSettings) {
    apply_overrides(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// [`apply_env_overrides`] passes the process environment; tests pass a map.
pub fn apply_overrides(settings: &mut HearthSettings, lookup: &dyn Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("HEARTH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("HEARTH_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("HEARTH_MAX_MESSAGE_SIZE", 1024, 16 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.usize("HEARTH_SEND_QUEUE_CAPACITY", 1, 65_536) {
        settings.server.send_queue_capacity = v;
    }
    if let Some(v) = env.u64("HEARTH_SEND_TIMEOUT_MS", 1, 60_000) {
        settings.server.send_timeout_ms = v;
    }
    if let Some(v) = env.u64("HEARTH_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("HEARTH_PONG_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.pong_timeout_ms = v;
    }

    // ── Auth settings ───────────────────────────────────────────────
    if let Some(v) = env.string("HEARTH_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.parsed("HEARTH_JWT_ALGORITHM") {
        settings.auth.jwt_algorithm = v;
    }
    if let Some(v) = env.u64("HEARTH_JWT_LEEWAY_SECS", 0, 3_600) {
        settings.auth.leeway_secs = v;
    }

    // ── Logging / directory ─────────────────────────────────────────
    if let Some(v) = env.string("HEARTH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("HEARTH_LOG_FORMAT") {
        settings.logging.format = v;
    }
    if let Some(v) = env.string("HEARTH_MEMBERSHIPS_PATH") {
        settings.directory.memberships_path = Some(v);
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        let val = self.string(name)?;
        let result = val.parse().ok();
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
