// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as non-empty paths, positive batch sizes, and consistent sleep bounds.

use crate::diagnostic::{ConfigError, suggest};
use crate::model::TributaryConfig;

/// Filter ops the registry knows how to build.
pub const KNOWN_FILTER_OPS: &[&str] = &[
    "match_all",
    "match_none",
    "or",
    "and",
    "match_author",
    "match_title",
    "match_source",
    "match_tag",
    "match_content",
    "match_field",
];

const FILTER_ACTIONS: &[&str] = &["accept", "reject"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &TributaryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.database_path.trim().is_empty() {
        errors.push(ConfigError::invalid("storage.database_path", "must not be empty"));
    }

    let positive = [
        ("service.worker_concurrency", config.service.worker_concurrency),
        ("aggregator.dispatch_batch_size", config.aggregator.dispatch_batch_size),
        ("aggregator.backfill_limit", config.aggregator.backfill_limit),
        ("scheduler.batch_size", config.scheduler.batch_size),
        ("broker.broadcast_capacity", config.broker.broadcast_capacity),
        ("broker.poll_interval_ms", config.broker.poll_interval_ms as usize),
        ("retry.max_attempts", config.retry.max_attempts as usize),
    ];
    for (key, value) in positive {
        if value == 0 {
            errors.push(ConfigError::invalid(key, "must be at least 1"));
        }
    }

    let max_sleep_ms = config.scheduler.max_sleep_secs.saturating_mul(1000);
    if config.scheduler.min_sleep_ms > max_sleep_ms {
        errors.push(
            ConfigError::invalid(
                "scheduler.min_sleep_ms",
                format!("exceeds scheduler.max_sleep_secs ({max_sleep_ms} ms)"),
            )
            .with_help(format!("lower it to at most {max_sleep_ms}")),
        );
    }

    let action = config.filters.default_action.as_str();
    if !FILTER_ACTIONS.contains(&action) {
        errors.push(
            ConfigError::invalid("filters.default_action", format!("unknown action `{action}`"))
                .with_help("use `accept` or `reject`"),
        );
    }

    for op in &config.filters.disabled {
        if KNOWN_FILTER_OPS.contains(&op.as_str()) {
            continue;
        }
        let mut error = ConfigError::invalid("filters.disabled", format!("unknown filter op `{op}`"));
        if let Some(close) = suggest(op, KNOWN_FILTER_OPS.iter().copied()) {
            error = error.with_help(format!("did you mean `{close}`?"));
        }
        errors.push(error);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
