// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring shared by every subcommand: store, broker, and model context.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tributary_bus::{EventBus, MemoryBroker, MessageDispatch};
use tributary_config::TributaryConfig;
use tributary_config::model::BrokerBackend;
use tributary_core::{DocumentStore, FeedIndexer, MessageBroker, PluginAdapter, TributaryError};
use tributary_model::{ModelContext, model_indexes};
use tributary_scheduler::{DispatchFeedIndexer, INDEX_FEED, scheduler_indexes};
use tributary_storage::{Database, SqliteBroker, SqliteDocumentStore};

/// Everything a running instance talks to.
pub struct Services {
    pub config: TributaryConfig,
    pub store: Arc<dyn DocumentStore>,
    pub broker: Arc<dyn MessageBroker>,
    pub dispatch: MessageDispatch,
    pub events: Arc<EventBus>,
    pub ctx: ModelContext,
}

impl Services {
    /// Open the database (running migrations) and build the broker.
    pub async fn open(config: TributaryConfig) -> Result<Self, TributaryError> {
        let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;
        info!(path = %db.path(), "database opened");

        let mut indexes = model_indexes();
        indexes.extend(scheduler_indexes());
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(db.clone(), indexes));

        let broker: Arc<dyn MessageBroker> = match config.broker.backend {
            BrokerBackend::Memory => {
                warn!("using in-memory broker, queued messages are lost on exit");
                Arc::new(MemoryBroker::new())
            }
            BrokerBackend::Sqlite => {
                let broker = SqliteBroker::new(
                    db,
                    Duration::from_millis(config.broker.poll_interval_ms),
                    Duration::from_secs(config.broker.lock_timeout_secs),
                );
                broker.recover_stale().await?;
                Arc::new(broker)
            }
        };

        let dispatch = MessageDispatch::new(broker.clone())
            .with_concurrency(config.service.worker_concurrency)
            .with_drain_timeout(Duration::from_secs(config.service.drain_timeout_secs));
        let events = Arc::new(EventBus::new(config.broker.broadcast_capacity));
        let ctx = ModelContext::from_config(store.clone(), dispatch.clone(), &config)?;

        Ok(Self {
            config,
            store,
            broker,
            dispatch,
            events,
            ctx,
        })
    }

    /// Fetch trigger that publishes to the `index_feed` queue.
    pub fn feed_indexer(&self) -> Arc<dyn FeedIndexer> {
        Arc::new(DispatchFeedIndexer::new(self.dispatch.clone()))
    }

    /// Rebuild indexes and declare every queue; with `purge`, drop backlogs
    /// and stored deferred messages as well.
    pub async fn bootstrap(&self, purge: bool) -> Result<(), TributaryError> {
        let indexed = self.store.rebuild_indexes().await?;
        info!(documents = indexed, "indexes rebuilt");
        self.declare_queues(purge).await
    }

    /// Declare every queue. Idempotent without `purge`.
    pub async fn declare_queues(&self, purge: bool) -> Result<(), TributaryError> {
        tributary_aggregator::bootstrap(&self.dispatch, purge).await?;
        let removed = tributary_scheduler::bootstrap(self.store.as_ref(), &self.dispatch, purge).await?;
        if removed > 0 {
            info!(removed, "deferred messages destroyed");
        }

        self.dispatch.declare(INDEX_FEED, Some(INDEX_FEED)).await?;
        if purge {
            self.dispatch.clear(INDEX_FEED).await?;
        }
        Ok(())
    }

    /// Release the store and broker.
    pub async fn close(&self) {
        self.events.kill();
        if let Err(e) = self.broker.shutdown().await {
            warn!(error = %e, "broker shutdown failed");
        }
        if let Err(e) = self.store.shutdown().await {
            warn!(error = %e, "store shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_config::load_config_from_str;

    fn config_in(dir: &tempfile::TempDir, backend: &str) -> TributaryConfig {
        let path = dir.path().join("svc.db");
        let toml = format!(
            "[storage]\ndatabase_path = {:?}\n\n[broker]\nbackend = \"{backend}\"\n",
            path.to_string_lossy()
        );
        load_config_from_str(&toml).unwrap()
    }

    #[tokio::test]
    async fn bootstrap_declares_every_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let services = Services::open(config_in(&dir, "sqlite")).await.unwrap();
        services.bootstrap(false).await.unwrap();

        let options = tributary_core::PublishOptions {
            mandatory: true,
            ..Default::default()
        };
        for message_type in [
            tributary_model::BUCKET_MODIFIED,
            tributary_aggregator::UPDATE_SUBSCRIPTION,
            tributary_scheduler::MESSAGE_SCHEDULER,
            INDEX_FEED,
        ] {
            let routed = services
                .broker
                .publish(message_type, &serde_json::json!({}), &options)
                .await
                .unwrap();
            assert_eq!(routed, 1, "{message_type} not bound");
        }

        services.bootstrap(true).await.unwrap();
        assert_eq!(services.broker.pending(INDEX_FEED).await.unwrap(), 0);
        services.close().await;
    }

    #[tokio::test]
    async fn memory_backend_is_selectable() {
        let dir = tempfile::TempDir::new().unwrap();
        let services = Services::open(config_in(&dir, "memory")).await.unwrap();
        assert_eq!(services.broker.name(), "memory-broker");
    }
}
