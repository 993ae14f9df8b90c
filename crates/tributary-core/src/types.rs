// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Tributary crates.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of adapter behind a trait object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    /// Versioned document store.
    Storage,
    /// Work-queue broker.
    Broker,
    /// External feed fetch trigger.
    Indexer,
}

/// Delivery options recorded with a published work message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Persist the message across broker restarts (delivery mode 2).
    #[serde(default = "default_persistent")]
    pub persistent: bool,

    /// Fail the publish if no queue is bound to the message type.
    #[serde(default)]
    pub mandatory: bool,

    /// Delivery priority, 0 (lowest) to 9.
    #[serde(default)]
    pub priority: u8,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            persistent: default_persistent(),
            mandatory: false,
            priority: 0,
        }
    }
}

fn default_persistent() -> bool {
    true
}

/// Highest priority accepted by the brokers.
pub const MAX_PRIORITY: u8 = 9;

/// A message handed to a consumer, acknowledged through its broker.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Queue the message was received from.
    pub queue: String,
    /// Broker-assigned tag used to acknowledge this delivery.
    pub tag: i64,
    /// Message body.
    pub payload: serde_json::Value,
    /// True if the broker handed this message out before without an ack.
    pub redelivered: bool,
}
