// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by the store, broker, and indexer backends.

use async_trait::async_trait;

use crate::error::TributaryError;
use crate::types::{AdapterType, HealthStatus};

/// Identity, health, and shutdown for a pluggable backend.
#[async_trait]
pub trait PluginAdapter: Send + Sync + 'static {
    /// Returns the human-readable name of this backend instance.
    fn name(&self) -> &str;

    /// Returns the semantic version of this backend.
    fn version(&self) -> semver::Version;

    /// Returns the kind of backend.
    fn adapter_type(&self) -> AdapterType;

    /// Performs a health check and returns the backend's current status.
    async fn health_check(&self) -> Result<HealthStatus, TributaryError>;

    /// Gracefully shuts down the backend, releasing any held resources.
    async fn shutdown(&self) -> Result<(), TributaryError>;
}
