// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./tributary.toml` > `~/.config/tributary/tributary.toml`
//! > `/etc/tributary/tributary.toml` with environment variable overrides via
//! the `TRIBUTARY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::TributaryConfig;

/// Config sections; env keys are split on the first underscore after one of these.
const SECTIONS: &[&str] = &[
    "service",
    "storage",
    "broker",
    "aggregator",
    "scheduler",
    "retry",
    "filters",
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/tributary/tributary.toml` (system-wide)
/// 3. `~/.config/tributary/tributary.toml` (user XDG config)
/// 4. `./tributary.toml` (local directory)
/// 5. `TRIBUTARY_*` environment variables
pub fn load_config() -> Result<TributaryConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<TributaryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TributaryConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<TributaryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(TributaryConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Config file locations, lowest priority first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/tributary/tributary.toml")];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("tributary/tributary.toml"));
    }
    paths.push(PathBuf::from("tributary.toml"));
    paths
}

/// Build the Figment used internally for config loading.
///
/// Returns the Figment before extraction so callers can inspect metadata.
pub fn build_figment() -> Figment {
    config_paths()
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(TributaryConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Create the environment variable provider using explicit `map()` for section-to-dot mapping.
///
/// Uses `Env::map()` rather than `Env::split("_")` because key names contain
/// underscores: `TRIBUTARY_SCHEDULER_MAX_CLAIM_SECS` must map to
/// `scheduler.max_claim_secs`, not `scheduler.max.claim.secs`.
fn env_provider() -> Env {
    Env::prefixed("TRIBUTARY_").map(|key| map_env_key(key.as_str()).into())
}

/// Map a lowercased, prefix-stripped env key to its dotted config path.
pub(crate) fn map_env_key(key: &str) -> String {
    for section in SECTIONS {
        let field = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'));
        if let Some(field) = field {
            return format!("{section}.{field}");
        }
    }
    key.to_string()
}
