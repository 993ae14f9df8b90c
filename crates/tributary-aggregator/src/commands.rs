// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wire commands consumed by the updater.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tributary_core::{PublishOptions, TributaryError};
use tributary_model::ItemRef;

/// Message type of every updater command.
pub const UPDATE_SUBSCRIPTION: &str = "update_subscription";

/// Queue the dispatcher consumes `bucket_modified` from.
pub const COMPOSITE_DISPATCH_QUEUE: &str = "composite_dispatch";

/// Queue the updater consumes commands from.
pub const UPDATE_SUBSCRIPTION_QUEUE: &str = "update_subscription";

/// An updater command, tagged by its `command` field.
///
/// Every field is optional on the wire; the updater ignores commands that
/// lack what it needs instead of failing to decode them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum SubscriptionCommand {
    /// Items changed in `bucket_id`; fold them into `composite_id`.
    UpdateSubscription {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        composite_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket_id: Option<String>,
        #[serde(default)]
        bucket_types: Vec<String>,
        #[serde(default)]
        updated_items: Vec<ItemRef>,
    },
    /// Composite `bucket_id` gained `new_subscriptions`; backfill them.
    InitSubscription {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bucket_id: Option<String>,
        #[serde(default)]
        new_subscriptions: Vec<String>,
    },
}

impl SubscriptionCommand {
    pub fn update(composite_id: &str, bucket_id: &str, bucket_types: &[String], items: &[ItemRef]) -> Self {
        Self::UpdateSubscription {
            composite_id: Some(composite_id.to_string()),
            bucket_id: Some(bucket_id.to_string()),
            bucket_types: bucket_types.to_vec(),
            updated_items: items.to_vec(),
        }
    }

    pub fn init(composite_id: &str, new_subscriptions: &[String]) -> Self {
        Self::InitSubscription {
            bucket_id: Some(composite_id.to_string()),
            new_subscriptions: new_subscriptions.to_vec(),
        }
    }

    pub fn from_value(message: Value) -> Result<Self, TributaryError> {
        serde_json::from_value(message)
            .map_err(|e| TributaryError::malformed(format!("subscription command: {e}")))
    }
}

/// Commands must reach a queue; an unbound type is an error.
pub(crate) fn command_options() -> PublishOptions {
    PublishOptions {
        mandatory: true,
        ..PublishOptions::default()
    }
}
