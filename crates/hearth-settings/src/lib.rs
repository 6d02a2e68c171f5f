//! # hearth-settings
//!
//! Layered configuration for the Hearth broadcast server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HearthSettings::default()`]
//! 2. **User file**: `~/.hearth/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `HEARTH_*` overrides (highest priority)
//!
//! Call [`HearthSettings::validate`] before starting the server.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
