// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tributary_aggregator::bootstrap;
use tributary_bus::{MemoryBroker, MessageDispatch};
use tributary_core::{FeedIndexer, MessageBroker, TributaryError};
use tributary_model::{ModelContext, model_indexes};
use tributary_resilience::RetryPolicy;
use tributary_storage::{Database, SqliteDocumentStore};

/// Records every fetch request instead of publishing it.
#[derive(Default)]
pub struct RecordingIndexer {
    pub requested: Mutex<Vec<String>>,
}

#[async_trait]
impl FeedIndexer for RecordingIndexer {
    async fn request_feed_index(&self, url: &str) -> Result<(), TributaryError> {
        self.requested.lock().await.push(url.to_string());
        Ok(())
    }

    async fn schedule_feed_index(&self, url: &str, _at: DateTime<Utc>) -> Result<(), TributaryError> {
        self.requested.lock().await.push(url.to_string());
        Ok(())
    }
}

pub struct Fixture {
    pub ctx: ModelContext,
    pub broker: Arc<MemoryBroker>,
    pub indexer: Arc<RecordingIndexer>,
    _dir: TempDir,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("aggregator.db");
        let db = Database::open(path.to_str().unwrap()).await.unwrap();
        let store = Arc::new(SqliteDocumentStore::new(db, model_indexes()));
        let broker = Arc::new(MemoryBroker::new());
        let dispatch = MessageDispatch::new(broker.clone());
        bootstrap(&dispatch, false).await.unwrap();
        let ctx = ModelContext::new(store, dispatch).with_retry(RetryPolicy::immediate(5));
        Self {
            ctx,
            broker,
            indexer: Arc::new(RecordingIndexer::default()),
            _dir: dir,
        }
    }

    /// Receive and acknowledge everything currently in `queue`.
    pub async fn drain(&self, queue: &str) -> Vec<Value> {
        let pending = self.broker.pending(queue).await.unwrap();
        let mut messages = Vec::with_capacity(pending);
        for _ in 0..pending {
            let delivery = tokio::time::timeout(Duration::from_secs(1), self.broker.receive(queue))
                .await
                .unwrap()
                .unwrap();
            self.broker.ack(&delivery).await.unwrap();
            messages.push(delivery.payload);
        }
        messages
    }
}
