// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fans `bucket_modified` events out to the composites that care.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use tributary_bus::MessageHandler;
use tributary_core::{RangeCursor, RangeQuery, TributaryError};
use tributary_model::index::COMPOSITES_BY_SUBSCRIPTION;
use tributary_model::{BucketModified, ModelContext};

use crate::commands::{SubscriptionCommand, UPDATE_SUBSCRIPTION, command_options};

/// Subscriber rows fetched per page.
pub const DEFAULT_DISPATCH_BATCH: usize = 100;

/// Handles `bucket_modified`.
///
/// A composite that gained subscriptions gets one `init_subscription`
/// command; every composite subscribed to a bucket with updated items gets
/// one `update_subscription` command.
pub struct CompositeDispatcher {
    ctx: ModelContext,
    batch_size: usize,
}

impl CompositeDispatcher {
    pub fn new(ctx: ModelContext) -> Self {
        Self {
            ctx,
            batch_size: DEFAULT_DISPATCH_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Route one event. Returns the number of commands sent.
    pub async fn dispatch(&self, event: &BucketModified) -> Result<usize, TributaryError> {
        if event.bucket_id.is_empty() {
            return Err(TributaryError::malformed("bucket_modified without bucket_id"));
        }
        let mut sent = 0;
        if event.is_composite() && !event.new_subscriptions.is_empty() {
            let cmd = SubscriptionCommand::init(&event.bucket_id, &event.new_subscriptions);
            self.send(&cmd).await?;
            debug!(
                composite_id = %event.bucket_id,
                subscriptions = event.new_subscriptions.len(),
                "init_subscription sent"
            );
            sent += 1;
        }
        if !event.updated_items.is_empty() {
            sent += self.notify_subscribers(event).await?;
        }
        Ok(sent)
    }

    async fn notify_subscribers(&self, event: &BucketModified) -> Result<usize, TributaryError> {
        let query = RangeQuery::exact(COMPOSITES_BY_SUBSCRIPTION, event.bucket_id.as_str());
        let mut cursor = RangeCursor::new(self.ctx.store().as_ref(), query, self.batch_size);
        let mut sent = 0;
        while let Some(rows) = cursor.next_batch().await? {
            for row in rows {
                debug!(composite_id = %row.doc_id, bucket_id = %event.bucket_id, "notify subscriber");
                let cmd = SubscriptionCommand::update(
                    &row.doc_id,
                    &event.bucket_id,
                    &event.bucket_types,
                    &event.updated_items,
                );
                self.send(&cmd).await?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    async fn send(&self, cmd: &SubscriptionCommand) -> Result<(), TributaryError> {
        let payload = serde_json::to_value(cmd)?;
        self.ctx
            .dispatch()
            .send_with(UPDATE_SUBSCRIPTION, &payload, &command_options())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for CompositeDispatcher {
    async fn handle(&self, message: Value) -> Result<(), TributaryError> {
        let event: BucketModified = serde_json::from_value(message)
            .map_err(|e| TributaryError::malformed(format!("bucket_modified: {e}")))?;
        match self.dispatch(&event).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(bucket_id = %event.bucket_id, error = %e, "failed to dispatch composite updates");
                Err(e)
            }
        }
    }
}
