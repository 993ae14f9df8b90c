// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the aggregator and scheduler over a temp SQLite
//! store carrying every index and an in-process broker with all queues
//! declared. Queued work can be driven inline with
//! [`TestHarness::run_until_quiescent`], or by real workers started with
//! [`TestHarness::start_aggregator`] and awaited with
//! [`TestHarness::wait_quiescent`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tributary_aggregator::{Aggregator, COMPOSITE_DISPATCH_QUEUE, UPDATE_SUBSCRIPTION_QUEUE};
use tributary_bus::{MemoryBroker, MessageDispatch, MessageHandler, WorkerHandle};
use tributary_core::{DocumentStore, MessageBroker, TributaryError};
use tributary_model::{BackfillSettings, ModelContext, model_indexes};
use tributary_resilience::RetryPolicy;
use tributary_scheduler::{Scheduler, scheduler_indexes};
use tributary_storage::{Database, SqliteDocumentStore};

use crate::faulty_store::FaultyStore;
use crate::indexer::RecordingFeedIndexer;

/// Rounds of inline draining before the harness gives up on a feedback loop.
const MAX_ROUNDS: usize = 1_000;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    retry: RetryPolicy,
    backfill: Option<BackfillSettings>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            retry: RetryPolicy::immediate(5),
            backfill: None,
        }
    }

    /// Conflict-retry policy for model writes.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How far back newly subscribed composites are backfilled.
    pub fn with_backfill(mut self, backfill: BackfillSettings) -> Self {
        self.backfill = Some(backfill);
        self
    }

    pub async fn build(self) -> Result<TestHarness, TributaryError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| TributaryError::Storage { source: e.into() })?;
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path.to_string_lossy()).await?;

        let mut indexes = model_indexes();
        indexes.extend(scheduler_indexes());
        let sqlite: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db, indexes));
        let store = Arc::new(FaultyStore::new(sqlite));

        let broker = Arc::new(MemoryBroker::new());
        let dispatch = MessageDispatch::new(broker.clone());
        tributary_aggregator::bootstrap(&dispatch, false).await?;
        tributary_scheduler::bootstrap(store.as_ref(), &dispatch, false).await?;

        let mut ctx = ModelContext::new(store.clone(), dispatch.clone()).with_retry(self.retry);
        if let Some(backfill) = self.backfill {
            ctx = ctx.with_backfill(backfill);
        }

        Ok(TestHarness {
            ctx,
            store,
            broker,
            dispatch,
            indexer: Arc::new(RecordingFeedIndexer::new()),
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment with fakes and temp storage.
pub struct TestHarness {
    /// Model context over the fault-injecting store.
    pub ctx: ModelContext,
    /// The store every component writes through.
    pub store: Arc<FaultyStore>,
    pub broker: Arc<MemoryBroker>,
    pub dispatch: MessageDispatch,
    /// Captures fetch requests made by the updater.
    pub indexer: Arc<RecordingFeedIndexer>,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// A harness with default settings.
    pub async fn new() -> Result<Self, TributaryError> {
        Self::builder().build().await
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.ctx.clone(), self.indexer.clone())
    }

    pub fn scheduler(&self) -> Scheduler {
        let store: Arc<dyn DocumentStore> = self.store.clone();
        Scheduler::new(store, self.dispatch.clone())
    }

    /// Start the aggregator workers; stop them by cancelling `cancel`.
    pub async fn start_aggregator(&self, cancel: CancellationToken) -> Result<Vec<WorkerHandle>, TributaryError> {
        self.aggregator().start(cancel).await
    }

    /// Handle queued aggregator messages inline until both queues are empty.
    ///
    /// Returns the number of messages handled. Handler errors are swallowed
    /// the same way the workers swallow them.
    pub async fn run_until_quiescent(&self) -> Result<usize, TributaryError> {
        let aggregator = self.aggregator();
        let dispatcher = aggregator.dispatcher();
        let updater = aggregator.updater();
        let stages: [(&str, &dyn MessageHandler); 2] = [
            (COMPOSITE_DISPATCH_QUEUE, &dispatcher),
            (UPDATE_SUBSCRIPTION_QUEUE, &updater),
        ];

        let mut handled = 0;
        for _ in 0..MAX_ROUNDS {
            let mut progressed = false;
            for (queue, handler) in stages {
                while self.broker.pending(queue).await? > 0 {
                    let delivery = self.broker.receive(queue).await?;
                    if let Err(e) = handler.handle(delivery.payload.clone()).await {
                        debug!(queue, error = %e, "handler failed in test harness");
                    }
                    self.broker.ack(&delivery).await?;
                    handled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                return Ok(handled);
            }
        }
        Err(TributaryError::Internal(format!(
            "aggregator queues still busy after {MAX_ROUNDS} rounds"
        )))
    }

    /// Wait until running workers have emptied both aggregator queues.
    pub async fn wait_quiescent(&self, timeout: Duration) -> Result<(), TributaryError> {
        let poll = async {
            let mut idle_checks = 0;
            loop {
                let mut busy = 0;
                for queue in [COMPOSITE_DISPATCH_QUEUE, UPDATE_SUBSCRIPTION_QUEUE] {
                    busy += self.broker.pending(queue).await?;
                }
                // Two idle looks in a row: a handler may be about to publish.
                idle_checks = if busy == 0 { idle_checks + 1 } else { 0 };
                if idle_checks >= 2 {
                    return Ok::<(), TributaryError>(());
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| TributaryError::Timeout { duration: timeout })?
    }

    /// Receive and acknowledge everything currently in `queue`.
    pub async fn drain(&self, queue: &str) -> Result<Vec<Value>, TributaryError> {
        let mut messages = Vec::new();
        while self.broker.pending(queue).await? > 0 {
            let delivery = self.broker.receive(queue).await?;
            self.broker.ack(&delivery).await?;
            messages.push(delivery.payload);
        }
        Ok(messages)
    }
}
