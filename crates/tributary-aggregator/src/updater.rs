// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Applies subscription commands to composites.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};
use tributary_bus::MessageHandler;
use tributary_core::{FeedIndexer, TributaryError};
use tributary_model::{Bucket, Composite, ItemRef, ModelContext, REMOTE_FEED_TYPE, RemoteFeed};

use crate::commands::SubscriptionCommand;

/// Handles `update_subscription` and `init_subscription` commands.
pub struct CompositeUpdater {
    ctx: ModelContext,
    indexer: Arc<dyn FeedIndexer>,
}

impl CompositeUpdater {
    pub fn new(ctx: ModelContext, indexer: Arc<dyn FeedIndexer>) -> Self {
        Self { ctx, indexer }
    }

    /// Apply one command. Returns the number of items that changed the composite.
    pub async fn apply(&self, cmd: SubscriptionCommand) -> Result<usize, TributaryError> {
        match cmd {
            SubscriptionCommand::UpdateSubscription {
                composite_id,
                bucket_id,
                updated_items,
                ..
            } => self.update_subscription(composite_id, bucket_id, updated_items).await,
            SubscriptionCommand::InitSubscription {
                bucket_id,
                new_subscriptions,
            } => self.init_subscriptions(bucket_id, new_subscriptions).await,
        }
    }

    async fn load_composite(&self, id: &str) -> Result<Option<Composite>, TributaryError> {
        let composite = Composite::get(&self.ctx, id).await?;
        if composite.is_none() {
            error!(composite_id = id, "ignoring command for missing composite");
        }
        Ok(composite)
    }

    async fn update_subscription(
        &self,
        composite_id: Option<String>,
        bucket_id: Option<String>,
        items: Vec<ItemRef>,
    ) -> Result<usize, TributaryError> {
        if items.is_empty() {
            debug!("ignoring subscription update with no items");
            return Ok(0);
        }
        let Some(composite_id) = composite_id else {
            debug!("ignoring subscription update with no composite_id");
            return Ok(0);
        };
        let Some(bucket_id) = bucket_id else {
            debug!(composite_id = %composite_id, "ignoring subscription update with no bucket_id");
            return Ok(0);
        };
        let Some(mut composite) = self.load_composite(&composite_id).await? else {
            return Ok(0);
        };

        // Subscription state may lag the event that produced this command.
        if !composite.is_subscribed(&bucket_id) {
            warn!(composite_id = %composite_id, bucket_id = %bucket_id, "update from unsubscribed bucket");
        }

        debug!(composite_id = %composite_id, bucket_id = %bucket_id, items = items.len(), "updating composite");
        let count = composite.filtered_update(items).await?;
        if count > 0 {
            save_tolerating_conflict(&mut composite).await?;
        }
        Ok(count)
    }

    async fn init_subscriptions(
        &self,
        composite_id: Option<String>,
        new_subscriptions: Vec<String>,
    ) -> Result<usize, TributaryError> {
        if new_subscriptions.is_empty() {
            warn!("ignoring init_subscription with no new subscriptions");
            return Ok(0);
        }
        let Some(composite_id) = composite_id else {
            error!("ignoring init_subscription with no bucket_id");
            return Ok(0);
        };
        let Some(mut composite) = self.load_composite(&composite_id).await? else {
            return Ok(0);
        };

        let mut unfetched = Vec::new();
        let mut updates = 0;
        for sub in &new_subscriptions {
            if !composite.is_subscribed(sub) {
                warn!(composite_id = %composite_id, bucket_id = %sub, "ignoring subscription not in composite");
                continue;
            }
            let Some(bucket) = Bucket::get(&self.ctx, sub).await? else {
                warn!(composite_id = %composite_id, bucket_id = %sub, "ignoring subscription to unknown bucket");
                continue;
            };
            if bucket.has_type(REMOTE_FEED_TYPE) {
                let feed = RemoteFeed::from_bucket(bucket)?;
                if feed.never_fetched() {
                    unfetched.push(feed.url.clone());
                    continue;
                }
            }
            match composite.init_subscription(sub).await {
                Ok(n) => {
                    debug!(composite_id = %composite_id, bucket_id = %sub, items = n, "subscription initialized");
                    updates += n;
                }
                Err(e) => {
                    error!(composite_id = %composite_id, bucket_id = %sub, error = %e, "failed to initialize subscription");
                }
            }
        }

        if updates > 0 {
            save_tolerating_conflict(&mut composite).await?;
        }

        for url in unfetched {
            if let Err(e) = self.indexer.request_feed_index(&url).await {
                warn!(url = %url, error = %e, "failed to request feed index");
            }
        }
        Ok(updates)
    }
}

/// Item writes stand on their own, so losing the container race is benign.
async fn save_tolerating_conflict(composite: &mut Composite) -> Result<(), TributaryError> {
    match composite.save().await {
        Err(e) if e.is_conflict() => {
            debug!(composite_id = %composite.id(), "composite save lost a race, items already written");
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl MessageHandler for CompositeUpdater {
    async fn handle(&self, message: Value) -> Result<(), TributaryError> {
        let cmd = SubscriptionCommand::from_value(message)?;
        self.apply(cmd).await.map(|_| ())
    }
}
