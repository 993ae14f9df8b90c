// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deferred messages ordered by `(claimed, timestamp)`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tributary_core::IndexDefinition;
use tributary_core::keys::{KEY_SEPARATOR, bool_key, compound_key, time_key};

use crate::message::{DeferredMessage, is_deferred};

pub const DEFERRED_BY_TIMESTAMP: &str = "deferred_by_timestamp";

/// Unclaimed messages sort before claimed ones, each partition by time.
pub struct DeferredByTimestamp;

impl IndexDefinition for DeferredByTimestamp {
    fn name(&self) -> &str {
        DEFERRED_BY_TIMESTAMP
    }

    fn map(&self, _doc_id: &str, body: &Value) -> Vec<(String, Value)> {
        if !is_deferred(body) {
            return Vec::new();
        }
        let Ok(msg) = serde_json::from_value::<DeferredMessage>(body.clone()) else {
            return Vec::new();
        };
        let key = compound_key(&[bool_key(msg.claimed), &time_key(&msg.timestamp)]);
        vec![(key, Value::Null)]
    }
}

/// The timestamp part of a [`DeferredByTimestamp`] key.
pub fn key_time(key: &str) -> Option<DateTime<Utc>> {
    let stamp = key.split(KEY_SEPARATOR).nth(1)?;
    DateTime::parse_from_rfc3339(stamp)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Every index the scheduler queries.
pub fn scheduler_indexes() -> Vec<Arc<dyn IndexDefinition>> {
    vec![Arc::new(DeferredByTimestamp)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeliveryOptions;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn claimed_partition_sorts_last() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut msg = DeferredMessage::new(Some("m"), at, DeliveryOptions::work("q"), json!({}));
        let pending = DeferredByTimestamp.map("id", &msg.to_body().unwrap());
        msg.claimed = true;
        msg.timestamp = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let claimed = DeferredByTimestamp.map("id", &msg.to_body().unwrap());
        assert!(pending[0].0 < claimed[0].0);
        assert_eq!(key_time(&pending[0].0), Some(at));
    }

    #[test]
    fn other_documents_are_skipped() {
        assert!(DeferredByTimestamp.map("x", &json!({"document_types": ["NewsBucket"]})).is_empty());
    }
}
