// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `bucket_modified` notification.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tributary_core::PublishOptions;

use crate::context::ModelContext;
use crate::item::ItemRef;

/// Message type published after every bucket save.
pub const BUCKET_MODIFIED: &str = "bucket_modified";

/// What changed in one saved bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketModified {
    pub bucket_id: String,
    #[serde(default)]
    pub bucket_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_items: Vec<ItemRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_items: Vec<ItemRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_subscriptions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_subscriptions: Vec<String>,
}

impl BucketModified {
    pub fn new(bucket_id: impl Into<String>, bucket_types: Vec<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            bucket_types,
            ..Self::default()
        }
    }

    pub fn is_composite(&self) -> bool {
        self.bucket_types.iter().any(|t| t == crate::composite::COMPOSITE_TYPE)
    }
}

/// Publish a bucket change.
///
/// Not mandatory. A failure is logged and swallowed.
pub async fn notify_bucket_modified(ctx: &ModelContext, event: &BucketModified) {
    let payload = match serde_json::to_value(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(bucket_id = %event.bucket_id, error = %e, "failed to encode bucket_modified");
            return;
        }
    };
    let options = PublishOptions {
        mandatory: false,
        ..PublishOptions::default()
    };
    match ctx.dispatch().send_with(BUCKET_MODIFIED, &payload, &options).await {
        Ok(routed) => debug!(
            bucket_id = %event.bucket_id,
            updated = event.updated_items.len(),
            removed = event.removed_items.len(),
            routed,
            "bucket_modified sent"
        ),
        Err(e) => warn!(bucket_id = %event.bucket_id, error = %e, "failed to send bucket_modified"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_deltas_are_left_out_of_the_wire_form() {
        let event = BucketModified::new("b1", vec!["NewsBucket".into()]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"bucket_id": "b1", "bucket_types": ["NewsBucket"]})
        );
    }

    #[test]
    fn parses_composite_event() {
        let event: BucketModified = serde_json::from_value(json!({
            "bucket_id": "c",
            "bucket_types": ["NewsBucket", "Composite"],
            "new_subscriptions": ["b1"],
            "updated_items": [{"item_id": "x", "bucket_id": "c"}]
        }))
        .unwrap();
        assert!(event.is_composite());
        assert_eq!(event.new_subscriptions, vec!["b1"]);
        assert_eq!(event.updated_items[0].item_id, "x");
    }
}
