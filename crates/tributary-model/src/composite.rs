// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composites: buckets fed from subscribed buckets through a filter chain.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use tributary_core::keys::{KEY_HIGH, KeyRange, time_key};
use tributary_core::{RangeQuery, TributaryError};
use tributary_filter::{FilterAction, FilterInput, FilterSpec};
use tributary_resilience::retry_on_conflict;

use crate::bucket::{BUCKET_TYPE, Bucket};
use crate::context::ModelContext;
use crate::index::ENTRIES_BY_TIMESTAMP;
use crate::item::{ItemRef, StoreItemLoader, has_type};
use crate::notify::BucketModified;

/// Document type tag of a composite.
pub const COMPOSITE_TYPE: &str = "Composite";

/// One subscribed source as recorded on the composite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub bucket_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
}

/// A bucket aggregating its subscriptions' items through a filter chain.
///
/// Derefs to [`Bucket`] for entry access; [`Composite::save`] must be used
/// instead of the bucket's own so subscription changes are stored and
/// announced.
#[derive(Debug)]
pub struct Composite {
    bucket: Bucket,
    subscriptions: BTreeMap<String, Subscription>,
    filters: Vec<FilterSpec>,
    rejected_ref: Option<String>,
    added_subs: BTreeSet<String>,
    removed_subs: BTreeSet<String>,
    rejected: Option<Bucket>,
}

impl Deref for Composite {
    type Target = Bucket;

    fn deref(&self) -> &Bucket {
        &self.bucket
    }
}

impl DerefMut for Composite {
    fn deref_mut(&mut self) -> &mut Bucket {
        &mut self.bucket
    }
}

impl Composite {
    pub fn new(ctx: ModelContext, id: Option<&str>) -> Self {
        let types = vec![BUCKET_TYPE.to_string(), COMPOSITE_TYPE.to_string()];
        Self::from_parts(Bucket::with_types(ctx, id, types))
    }

    fn from_parts(bucket: Bucket) -> Self {
        Self {
            bucket,
            subscriptions: BTreeMap::new(),
            filters: Vec::new(),
            rejected_ref: None,
            added_subs: BTreeSet::new(),
            removed_subs: BTreeSet::new(),
            rejected: None,
        }
    }

    /// Load a composite; `None` if missing or not a composite.
    pub async fn get(ctx: &ModelContext, id: &str) -> Result<Option<Self>, TributaryError> {
        match Bucket::get(ctx, id).await? {
            Some(bucket) if bucket.has_type(COMPOSITE_TYPE) => Ok(Some(Self::from_bucket(bucket)?)),
            _ => Ok(None),
        }
    }

    /// View a loaded bucket as a composite.
    pub fn from_bucket(bucket: Bucket) -> Result<Self, TributaryError> {
        let subscriptions = match bucket.attribute("subscriptions") {
            Some(Value::Null) | None => BTreeMap::new(),
            Some(raw) => serde_json::from_value(raw.clone())?,
        };
        let filters = match bucket.attribute("filters") {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())?,
        };
        let rejected_ref = bucket
            .attribute("rejected_ref")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Ok(Self {
            subscriptions,
            filters,
            rejected_ref,
            ..Self::from_parts(bucket)
        })
    }

    pub fn subscriptions(&self) -> &BTreeMap<String, Subscription> {
        &self.subscriptions
    }

    pub fn is_subscribed(&self, bucket_id: &str) -> bool {
        self.subscriptions.contains_key(bucket_id)
    }

    /// Subscribe to `bucket_id`, refreshing its title and url if already present.
    ///
    /// Returns true if the subscription is new.
    pub fn subscribe(&mut self, bucket_id: &str, title: Option<&str>, url: Option<&str>) -> bool {
        let sub = Subscription {
            bucket_id: bucket_id.to_string(),
            title: title.unwrap_or(bucket_id).to_string(),
            url: url.unwrap_or_default().to_string(),
        };
        let added = !self.subscriptions.contains_key(bucket_id);
        if added {
            self.removed_subs.remove(bucket_id);
            self.added_subs.insert(bucket_id.to_string());
        }
        self.subscriptions.insert(bucket_id.to_string(), sub);
        added
    }

    /// Subscribe to a loaded bucket, defaulting title and url to the bucket's.
    pub fn subscribe_bucket(&mut self, bucket: &Bucket, title: Option<&str>, url: Option<&str>) -> bool {
        let title = title.unwrap_or(&bucket.title);
        let url = url.unwrap_or(&bucket.url);
        self.subscribe(bucket.id(), Some(title), Some(url))
    }

    /// Returns true if the subscription existed.
    pub fn unsubscribe(&mut self, bucket_id: &str) -> bool {
        if self.subscriptions.remove(bucket_id).is_none() {
            return false;
        }
        self.added_subs.remove(bucket_id);
        self.removed_subs.insert(bucket_id.to_string());
        true
    }

    /// Subscription ids added and removed since the last save.
    pub fn subscription_changes(&self) -> (Vec<&str>, Vec<&str>) {
        (
            self.added_subs.iter().map(String::as_str).collect(),
            self.removed_subs.iter().map(String::as_str).collect(),
        )
    }

    pub fn filters(&self) -> &[FilterSpec] {
        &self.filters
    }

    pub fn set_filters(&mut self, filters: Vec<FilterSpec>) {
        self.filters = filters;
    }

    pub fn push_filter(&mut self, filter: FilterSpec) {
        self.filters.push(filter);
    }

    pub fn rejected_ref(&self) -> Option<&str> {
        self.rejected_ref.as_deref()
    }

    /// Name the bucket that receives rejected items.
    pub fn set_rejected_ref(&mut self, rejected_ref: Option<String>) {
        self.rejected_ref = rejected_ref;
    }

    /// The reject bucket, loaded on first use.
    pub async fn rejected(&mut self) -> Result<Option<&mut Bucket>, TributaryError> {
        let Some(rejected_id) = self.rejected_ref.clone() else {
            return Ok(None);
        };
        let cached = self
            .rejected
            .as_ref()
            .is_some_and(|b| b.id() == rejected_id);
        if !cached {
            let ctx = self.bucket.context().clone();
            self.rejected = Bucket::get(&ctx, &rejected_id).await?;
            if self.rejected.is_none() {
                warn!(composite_id = %self.bucket.id(), rejected_id = %rejected_id, "reject bucket does not exist");
            }
        }
        Ok(self.rejected.as_mut())
    }

    /// Run `items` through the filter chain.
    ///
    /// Accepted items are added to the composite; rejected items are added to
    /// the reject bucket, if any, without further filtering. Returns how many
    /// accepted items changed the composite.
    pub async fn filtered_update(&mut self, items: Vec<ItemRef>) -> Result<usize, TributaryError> {
        let ctx = self.bucket.context().clone();
        let chain = ctx.filters().create_chain(&self.filters);
        let loader = StoreItemLoader::new(ctx.store().clone());

        let mut accepts = Vec::new();
        let mut rejects = Vec::new();
        for item in items {
            let value = serde_json::to_value(&item)?;
            let input = FilterInput::with_loader(&value, &loader);
            match chain.evaluate(&input).await {
                FilterAction::Accept => accepts.push(item),
                FilterAction::Reject => rejects.push(item),
            }
        }

        let accepted = accepts.len();
        let mut updated = 0;
        for item in accepts {
            if self.bucket.add_news_item(item).await? {
                updated += 1;
            }
        }

        let rejected = rejects.len();
        if !rejects.is_empty() {
            if let Some(reject_bucket) = self.rejected().await? {
                for item in rejects {
                    reject_bucket.add_news_item(item).await?;
                }
            }
        }

        info!(
            composite_id = %self.bucket.id(),
            accepted,
            updated,
            rejected,
            "filtered update"
        );
        Ok(updated)
    }

    /// Backfill from a newly subscribed bucket's most recent items.
    ///
    /// Returns 0 without reading anything if `bucket_id` is not subscribed.
    pub async fn init_subscription(&mut self, bucket_id: &str) -> Result<usize, TributaryError> {
        if !self.is_subscribed(bucket_id) {
            return Ok(0);
        }
        let ctx = self.bucket.context().clone();
        let backfill = ctx.backfill();
        let lookback = TimeDelta::from_std(backfill.lookback).unwrap_or(TimeDelta::days(1));
        let stop = Utc::now() - lookback;
        let range = KeyRange::between(&[bucket_id], &time_key(&stop), &KEY_HIGH.to_string());
        let query = RangeQuery::range(ENTRIES_BY_TIMESTAMP, range)
            .descending()
            .limit(backfill.limit);

        let rows = ctx.store().range_query(&query).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<ItemRef>(row.value) {
                Ok(item) => items.push(item),
                Err(e) => warn!(bucket_id, doc_id = %row.doc_id, error = %e, "skipping unreadable entry"),
            }
        }
        debug!(composite_id = %self.bucket.id(), bucket_id, candidates = items.len(), "init subscription");
        if items.is_empty() {
            return Ok(0);
        }
        self.filtered_update(items).await
    }

    fn sync_attributes(&mut self) -> Result<(), TributaryError> {
        let subscriptions = serde_json::to_value(&self.subscriptions)?;
        let filters = serde_json::to_value(&self.filters)?;
        let rejected_ref = serde_json::to_value(&self.rejected_ref)?;
        self.bucket.set_attribute("subscriptions", subscriptions);
        self.bucket.set_attribute("filters", filters);
        self.bucket.set_attribute("rejected_ref", rejected_ref);
        Ok(())
    }

    /// Save the composite, announcing subscription changes, then the reject bucket.
    pub async fn save(&mut self) -> Result<(), TributaryError> {
        self.sync_attributes()?;
        let event = BucketModified {
            new_subscriptions: std::mem::take(&mut self.added_subs).into_iter().collect(),
            removed_subscriptions: std::mem::take(&mut self.removed_subs).into_iter().collect(),
            ..BucketModified::default()
        };
        let result = self.bucket.save_with_event(event).await;

        if let Some(rejected) = self.rejected.as_mut() {
            if let Err(e) = rejected.save().await {
                warn!(composite_id = %self.bucket.id(), rejected_id = %rejected.id(), error = %e, "failed to save reject bucket");
            }
        }
        result
    }

    /// Load, change and save a composite, retrying the whole cycle on conflict.
    pub async fn modify<F>(ctx: &ModelContext, id: &str, f: F) -> Result<Composite, TributaryError>
    where
        F: Fn(&mut Composite) -> Result<(), TributaryError> + Sync,
    {
        let f = &f;
        retry_on_conflict(ctx.retry(), move |attempt| async move {
            let mut composite = Composite::get(ctx, id)
                .await?
                .ok_or_else(|| TributaryError::NotFound { id: id.to_string() })?;
            f(&mut composite)?;
            composite.save().await?;
            if attempt > 1 {
                debug!(composite_id = id, attempt, "composite modified after retry");
            }
            Ok(composite)
        })
        .await
    }
}

/// True if a stored body is a composite.
pub fn is_composite(body: &Value) -> bool {
    has_type(body, COMPOSITE_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BackfillSettings;
    use crate::index::COMPOSITES_BY_SUBSCRIPTION;
    use crate::testing::{TestModel, item_at, item_by};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn subscription_deltas_are_exclusive() {
        let model = TestModel::new().await;
        let mut c = Composite::new(model.ctx.clone(), Some("c"));
        assert!(c.subscribe("b1", None, None));
        assert!(!c.subscribe("b1", Some("B one"), None));
        assert_eq!(c.subscriptions()["b1"].title, "B one");
        assert!(c.unsubscribe("b1"));
        assert!(!c.unsubscribe("b1"));
        let (added, removed) = c.subscription_changes();
        assert!(added.is_empty());
        assert_eq!(removed, vec!["b1"]);

        c.subscribe("b1", None, None);
        let (added, removed) = c.subscription_changes();
        assert_eq!(added, vec!["b1"]);
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn save_round_trips_and_announces_subscriptions() {
        let model = TestModel::new().await;
        let mut c = Composite::new(model.ctx.clone(), Some("c"));
        c.title = "Combined".into();
        c.subscribe("b1", Some("First"), Some("http://one"));
        c.push_filter(FilterSpec::new("match_all", json!({}), FilterAction::Accept));
        c.set_rejected_ref(Some("r".into()));
        c.save().await.unwrap();

        let loaded = Composite::get(&model.ctx, "c").await.unwrap().unwrap();
        assert_eq!(loaded.title, "Combined");
        assert_eq!(loaded.subscriptions()["b1"].url, "http://one");
        assert_eq!(loaded.filters().len(), 1);
        assert_eq!(loaded.rejected_ref(), Some("r"));
        assert!(Composite::get(&model.ctx, "missing").await.unwrap().is_none());

        let events = model.bucket_events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_composite());
        assert_eq!(events[0].new_subscriptions, vec!["b1"]);

        let rows = model
            .ctx
            .store()
            .range_query(&RangeQuery::exact(COMPOSITES_BY_SUBSCRIPTION, "b1"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].doc_id, "c");
    }

    #[tokio::test]
    async fn filtered_update_routes_rejects() {
        let model = TestModel::new().await;
        let mut rejected = Bucket::new(model.ctx.clone(), Some("r"));
        rejected.save().await.unwrap();

        let mut c = Composite::new(model.ctx.clone(), Some("c"));
        c.set_filters(vec![
            FilterSpec::new("match_author", json!({"values": ["fred"]}), FilterAction::Reject),
            FilterSpec::new("match_all", json!({}), FilterAction::Accept),
        ]);
        c.set_rejected_ref(Some("r".into()));

        let items = vec![item_by("a", 1, "fred"), item_by("b", 2, "wilma"), item_by("c", 3, "Fred ")];
        assert_eq!(c.filtered_update(items.clone()).await.unwrap(), 1);
        // Same items again change nothing.
        assert_eq!(c.filtered_update(items).await.unwrap(), 0);
        c.save().await.unwrap();

        assert!(c.has_news_item("b").await.unwrap());
        assert!(!c.has_news_item("a").await.unwrap());
        let mut r = Bucket::get(&model.ctx, "r").await.unwrap().unwrap();
        assert!(r.has_news_item("a").await.unwrap());
        assert!(r.has_news_item("c").await.unwrap());
        assert!(!r.has_news_item("b").await.unwrap());
    }

    #[tokio::test]
    async fn init_subscription_backfills_recent_items() {
        let model = TestModel::new().await;
        let ctx = model.ctx.clone().with_backfill(BackfillSettings {
            limit: 2,
            lookback: Duration::from_secs(3_600),
        });

        let mut source = Bucket::new(ctx.clone(), Some("src"));
        let now = Utc::now();
        for (id, age_secs) in [("old", 7_200), ("a", 300), ("b", 200), ("c", 100)] {
            let mut item = ItemRef::new("src", id);
            item.timestamp = Some(now - ChronoDuration::seconds(age_secs));
            source.add_news_item(item).await.unwrap();
        }
        source.save().await.unwrap();

        let mut c = Composite::new(ctx.clone(), Some("c"));
        assert_eq!(c.init_subscription("src").await.unwrap(), 0);

        c.subscribe("src", None, None);
        assert_eq!(c.init_subscription("src").await.unwrap(), 2);
        assert!(c.has_news_item("b").await.unwrap());
        assert!(c.has_news_item("c").await.unwrap());
        assert!(!c.has_news_item("a").await.unwrap());
        assert!(!c.has_news_item("old").await.unwrap());
    }

    #[tokio::test]
    async fn modify_applies_and_persists() {
        let model = TestModel::new().await;
        let mut c = Composite::new(model.ctx.clone(), Some("c"));
        c.save().await.unwrap();

        let updated = Composite::modify(&model.ctx, "c", |c| {
            c.subscribe("b2", None, None);
            Ok(())
        })
        .await
        .unwrap();
        assert!(updated.is_subscribed("b2"));
        assert!(Composite::get(&model.ctx, "c").await.unwrap().unwrap().is_subscribed("b2"));

        let missing = Composite::modify(&model.ctx, "nope", |_| Ok(())).await;
        assert!(matches!(missing, Err(TributaryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn items_keep_their_source_fields() {
        let model = TestModel::new().await;
        let mut c = Composite::new(model.ctx.clone(), Some("c"));
        let item = item_at("x", 1, "Title");
        c.filtered_update(vec![item]).await.unwrap();
        let stored = c.entries().await.unwrap().get("x").unwrap().clone();
        assert_eq!(stored.bucket_id, "c");
        assert_eq!(stored.title.as_deref(), Some("Title"));
    }
}
