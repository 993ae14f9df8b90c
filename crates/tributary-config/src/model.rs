// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Tributary aggregator.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top-level Tributary configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TributaryConfig {
    /// Process identity, logging, and worker pool settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Document store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Work-queue broker and event bus settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Aggregation worker settings.
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Deferred message scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Store-conflict retry settings.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Filter registry settings.
    #[serde(default)]
    pub filters: FiltersConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Instance name, included in startup logs.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum handlers in flight per worker.
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Seconds to wait for in-flight handlers on shutdown.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            worker_concurrency: default_worker_concurrency(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

fn default_service_name() -> String {
    "tributary".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_drain_timeout_secs() -> u64 {
    10
}

/// Document store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("tributary").join("tributary.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("tributary.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Which work-queue implementation to run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BrokerBackend {
    /// In-process queues; messages are lost on restart.
    Memory,
    /// Durable queues in the SQLite database.
    #[default]
    Sqlite,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Work-queue implementation.
    #[serde(default)]
    pub backend: BrokerBackend,

    /// How often an idle durable queue is polled, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Lease on a received durable message before it is handed out again.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Buffered events per broadcast channel before slow listeners lag.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::default(),
            poll_interval_ms: default_poll_interval_ms(),
            lock_timeout_secs: default_lock_timeout_secs(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_lock_timeout_secs() -> u64 {
    300
}

fn default_broadcast_capacity() -> usize {
    256
}

/// Aggregation worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    /// Run the dispatcher and updater in `serve`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Page size when walking the subscription index.
    #[serde(default = "default_dispatch_batch_size")]
    pub dispatch_batch_size: usize,

    /// Most recent items copied into a composite on a new subscription.
    #[serde(default = "default_backfill_limit")]
    pub backfill_limit: usize,

    /// Only items newer than this many seconds are backfilled.
    #[serde(default = "default_backfill_lookback_secs")]
    pub backfill_lookback_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_batch_size: default_dispatch_batch_size(),
            backfill_limit: default_backfill_limit(),
            backfill_lookback_secs: default_backfill_lookback_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_dispatch_batch_size() -> usize {
    100
}

fn default_backfill_limit() -> usize {
    50
}

fn default_backfill_lookback_secs() -> u64 {
    86_400
}

/// Deferred message scheduler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Run the listener and dispatcher in `serve`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Shortest dispatcher sleep, in milliseconds.
    #[serde(default = "default_min_sleep_ms")]
    pub min_sleep_ms: u64,

    /// Longest dispatcher sleep, in seconds.
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    /// A claim older than this is presumed abandoned.
    #[serde(default = "default_max_claim_secs")]
    pub max_claim_secs: u64,

    /// Page size for due-message queries.
    #[serde(default = "default_scheduler_batch_size")]
    pub batch_size: usize,

    /// Error count at which the retry delay stops doubling.
    #[serde(default = "default_max_backoff_exponent")]
    pub max_backoff_exponent: u32,

    /// Retry delay once the exponent cap is reached, in seconds.
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sleep_ms: default_min_sleep_ms(),
            max_sleep_secs: default_max_sleep_secs(),
            max_claim_secs: default_max_claim_secs(),
            batch_size: default_scheduler_batch_size(),
            max_backoff_exponent: default_max_backoff_exponent(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms)
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }

    pub fn max_claim(&self) -> Duration {
        Duration::from_secs(self.max_claim_secs)
    }
}

fn default_min_sleep_ms() -> u64 {
    1_000
}

fn default_max_sleep_secs() -> u64 {
    3_600
}

fn default_max_claim_secs() -> u64 {
    300
}

fn default_scheduler_batch_size() -> usize {
    100
}

fn default_max_backoff_exponent() -> u32 {
    10
}

fn default_max_retry_delay_secs() -> u64 {
    600
}

/// Store-conflict retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total executions before a conflict is returned to the caller.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    6
}

fn default_initial_backoff_ms() -> u64 {
    100
}

/// Filter registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FiltersConfig {
    /// Chain result when no filter matches (`accept` or `reject`).
    #[serde(default = "default_filter_action")]
    pub default_action: String,

    /// Filter ops to leave out of the registry.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            default_action: default_filter_action(),
            disabled: Vec::new(),
        }
    }
}

fn default_filter_action() -> String {
    "accept".to_string()
}
