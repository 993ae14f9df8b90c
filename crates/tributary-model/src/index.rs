// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index definitions over bucket, item and composite documents.

use std::sync::Arc;

use serde_json::Value;
use tributary_core::IndexDefinition;
use tributary_core::keys::{compound_key, time_key};

use crate::composite::COMPOSITE_TYPE;
use crate::item::{ITEM_REF_TYPE, ItemRef, has_type};

pub const BUCKET_ENTRIES: &str = "bucket_entries";
pub const ENTRIES_BY_TIMESTAMP: &str = "entries_by_timestamp";
pub const COMPOSITES_BY_SUBSCRIPTION: &str = "composites_by_subscription";
pub const COMPOSITE_SUBSCRIPTIONS_BY_TITLE: &str = "composite_subscriptions_by_title";

/// Item references keyed by owning bucket id.
pub struct BucketEntries;

impl IndexDefinition for BucketEntries {
    fn name(&self) -> &str {
        BUCKET_ENTRIES
    }

    fn map(&self, _doc_id: &str, body: &Value) -> Vec<(String, Value)> {
        if !has_type(body, ITEM_REF_TYPE) {
            return Vec::new();
        }
        match (
            body.get("bucket_id").and_then(Value::as_str),
            body.get("item_id"),
        ) {
            (Some(bucket_id), Some(item_id)) => vec![(bucket_id.to_string(), item_id.clone())],
            _ => Vec::new(),
        }
    }
}

/// Item references keyed by `[bucket_id, timestamp]`, valued by the reference.
///
/// A reference without a timestamp sorts before every stamped one.
pub struct EntriesByTimestamp;

impl IndexDefinition for EntriesByTimestamp {
    fn name(&self) -> &str {
        ENTRIES_BY_TIMESTAMP
    }

    fn map(&self, _doc_id: &str, body: &Value) -> Vec<(String, Value)> {
        if !has_type(body, ITEM_REF_TYPE) {
            return Vec::new();
        }
        let Ok(item) = serde_json::from_value::<ItemRef>(body.clone()) else {
            return Vec::new();
        };
        let stamp = item.timestamp.as_ref().map(time_key).unwrap_or_default();
        let key = compound_key(&[&item.bucket_id, &stamp]);
        let mut value = body.clone();
        if let Value::Object(map) = &mut value {
            map.remove("document_types");
        }
        vec![(key, value)]
    }
}

/// Composite ids keyed by each subscribed bucket id.
pub struct CompositesBySubscription;

impl IndexDefinition for CompositesBySubscription {
    fn name(&self) -> &str {
        COMPOSITES_BY_SUBSCRIPTION
    }

    fn map(&self, _doc_id: &str, body: &Value) -> Vec<(String, Value)> {
        if !has_type(body, COMPOSITE_TYPE) {
            return Vec::new();
        }
        body.get("subscriptions")
            .and_then(Value::as_object)
            .map(|subs| subs.keys().map(|id| (id.clone(), Value::Null)).collect())
            .unwrap_or_default()
    }
}

/// Each composite's subscriptions keyed by `[composite_id, title]`.
pub struct CompositeSubscriptionsByTitle;

impl IndexDefinition for CompositeSubscriptionsByTitle {
    fn name(&self) -> &str {
        COMPOSITE_SUBSCRIPTIONS_BY_TITLE
    }

    fn map(&self, doc_id: &str, body: &Value) -> Vec<(String, Value)> {
        if !has_type(body, COMPOSITE_TYPE) {
            return Vec::new();
        }
        let Some(subs) = body.get("subscriptions").and_then(Value::as_object) else {
            return Vec::new();
        };
        subs.values()
            .map(|sub| {
                let title = sub.get("title").and_then(Value::as_str).unwrap_or("");
                (compound_key(&[doc_id, title]), sub.clone())
            })
            .collect()
    }
}

/// Every index the bucket model queries.
pub fn model_indexes() -> Vec<Arc<dyn IndexDefinition>> {
    vec![
        Arc::new(BucketEntries),
        Arc::new(EntriesByTimestamp),
        Arc::new(CompositesBySubscription),
        Arc::new(CompositeSubscriptionsByTitle),
    ]
}
