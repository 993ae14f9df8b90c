// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration system for the Tributary aggregator.
//!
//! Provides TOML configuration parsing with strict validation (`deny_unknown_fields`),
//! XDG file hierarchy lookup, environment variable overrides, and diagnostic
//! error rendering with typo suggestions.
//!
//! # Usage
//!
//! ```no_run
//! use tributary_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("database: {}", config.storage.database_path);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

pub use diagnostic::{ConfigError, ConfigSource, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::TributaryConfig;

/// Load configuration from the XDG hierarchy and validate it.
///
/// Extraction errors and validation failures are both returned as
/// diagnostics pointing into whichever config file holds the offending key.
pub fn load_and_validate() -> Result<TributaryConfig, Vec<ConfigError>> {
    finish(loader::load_config(), &collect_toml_sources())
}

/// Load configuration from an explicit file (plus env overrides) and validate it.
pub fn load_and_validate_path(path: &std::path::Path) -> Result<TributaryConfig, Vec<ConfigError>> {
    let sources: Vec<ConfigSource> = std::fs::read_to_string(path)
        .map(|content| vec![ConfigSource::new(path.display().to_string(), content)])
        .unwrap_or_default();
    finish(loader::load_config_from_path(path), &sources)
}

/// Load configuration from a TOML string and validate it.
pub fn load_and_validate_str(toml_content: &str) -> Result<TributaryConfig, Vec<ConfigError>> {
    let sources = [ConfigSource::new("<inline>", toml_content)];
    finish(loader::load_config_from_str(toml_content), &sources)
}

fn finish(
    loaded: Result<TributaryConfig, figment::Error>,
    sources: &[ConfigSource],
) -> Result<TributaryConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::from_figment(err, sources))?;
    validation::validate_config(&config).map_err(|mut errors| {
        // Sources are ordered highest priority first.
        for error in &mut errors {
            for source in sources {
                if error.locate(source) {
                    break;
                }
            }
        }
        errors
    })?;
    Ok(config)
}

/// Read every config file that exists, highest priority first, so errors
/// can point into them.
fn collect_toml_sources() -> Vec<ConfigSource> {
    loader::config_paths()
        .into_iter()
        .rev()
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            let name = if path.is_relative() {
                std::env::current_dir().map(|d| d.join(&path)).unwrap_or(path)
            } else {
                path
            };
            Some(ConfigSource::new(name.display().to_string(), content))
        })
        .collect()
}
