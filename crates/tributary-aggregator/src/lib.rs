// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Composite aggregation workers.
//!
//! The dispatcher consumes `bucket_modified` from the `composite_dispatch`
//! queue and turns each event into per-composite commands. The updater
//! consumes those commands from the `update_subscription` queue and folds
//! items into composites. Both acknowledge every message; a lost update is
//! repaired by the next save of the source bucket.

pub mod commands;
pub mod dispatcher;
pub mod updater;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tributary_bus::{MessageDispatch, WorkerHandle};
use tributary_config::model::AggregatorConfig;
use tributary_core::{FeedIndexer, TributaryError};
use tributary_model::{BUCKET_MODIFIED, ModelContext};

pub use commands::{
    COMPOSITE_DISPATCH_QUEUE, SubscriptionCommand, UPDATE_SUBSCRIPTION, UPDATE_SUBSCRIPTION_QUEUE,
};
pub use dispatcher::{CompositeDispatcher, DEFAULT_DISPATCH_BATCH};
pub use updater::CompositeUpdater;

/// Declare the aggregator queues, optionally dropping their backlog.
pub async fn bootstrap(dispatch: &MessageDispatch, purge: bool) -> Result<(), TributaryError> {
    info!("setting up aggregator queues");
    dispatch
        .declare(BUCKET_MODIFIED, Some(COMPOSITE_DISPATCH_QUEUE))
        .await?;
    dispatch
        .declare(UPDATE_SUBSCRIPTION, Some(UPDATE_SUBSCRIPTION_QUEUE))
        .await?;
    if purge {
        info!("clearing aggregator queues");
        dispatch.clear(COMPOSITE_DISPATCH_QUEUE).await?;
        dispatch.clear(UPDATE_SUBSCRIPTION_QUEUE).await?;
    }
    Ok(())
}

/// The dispatcher and updater as one unit.
pub struct Aggregator {
    ctx: ModelContext,
    indexer: Arc<dyn FeedIndexer>,
    batch_size: usize,
}

impl Aggregator {
    pub fn new(ctx: ModelContext, indexer: Arc<dyn FeedIndexer>) -> Self {
        Self {
            ctx,
            indexer,
            batch_size: DEFAULT_DISPATCH_BATCH,
        }
    }

    pub fn from_config(ctx: ModelContext, indexer: Arc<dyn FeedIndexer>, config: &AggregatorConfig) -> Self {
        Self {
            batch_size: config.dispatch_batch_size.max(1),
            ..Self::new(ctx, indexer)
        }
    }

    pub fn dispatcher(&self) -> CompositeDispatcher {
        CompositeDispatcher::new(self.ctx.clone()).with_batch_size(self.batch_size)
    }

    pub fn updater(&self) -> CompositeUpdater {
        CompositeUpdater::new(self.ctx.clone(), self.indexer.clone())
    }

    /// Start both workers; they run until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<WorkerHandle>, TributaryError> {
        let dispatch = self.ctx.dispatch();
        let dispatcher = dispatch
            .start_worker(
                BUCKET_MODIFIED,
                Arc::new(self.dispatcher()),
                Some(COMPOSITE_DISPATCH_QUEUE),
                cancel.clone(),
            )
            .await?;
        let updater = dispatch
            .start_worker(
                UPDATE_SUBSCRIPTION,
                Arc::new(self.updater()),
                Some(UPDATE_SUBSCRIPTION_QUEUE),
                cancel,
            )
            .await?;
        Ok(vec![dispatcher, updater])
    }
}
