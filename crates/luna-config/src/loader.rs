// SPDX-FileCopyrightText: 2026 Luna Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./luna.toml` > `~/.config/luna/luna.toml` > `/etc/luna/luna.toml`
//! with environment variable overrides via `LUNA_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::LunaConfig;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/luna/luna.toml";

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/luna/luna.toml` (system-wide)
/// 3. `~/.config/luna/luna.toml` (user XDG config)
/// 4. `./luna.toml` (local directory)
/// 5. `LUNA_*` environment variables
pub fn load_config() -> Result<LunaConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<LunaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LunaConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<LunaConfig, figment::Error> {
    tracing::debug!(path = %path.display(), "loading configuration file");
    Figment::new()
        .merge(Serialized::defaults(LunaConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Render the effective configuration, defaults included, as TOML.
pub fn to_toml(config: &LunaConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(LunaConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("luna/luna.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("luna.toml"))
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `LUNA_QUEUE_GRACE_PERIOD_MS` must map to `queue.grace_period_ms`.
fn env_provider() -> Env {
    Env::prefixed("LUNA_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("daemon_", "daemon.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("queue_", "queue.", 1)
            .replacen("api_", "api.", 1)
            .replacen("ha_", "ha.", 1)
            .replacen("operations_", "operations.", 1);
        mapped.into()
    })
}
