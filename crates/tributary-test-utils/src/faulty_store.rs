// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document store wrapper that injects write conflicts.
//!
//! `FaultyStore` forwards everything to an inner store, except that puts to
//! documents armed with [`FaultyStore::conflict_on`] come back as
//! [`WriteStatus::Conflict`] without being applied. The rest of the batch is
//! written normally, which is how a concurrent writer looks to `bulk_update`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tributary_core::traits::adapter::PluginAdapter;
use tributary_core::types::{AdapterType, HealthStatus};
use tributary_core::{
    Document, DocumentStore, DocumentWrite, IndexRow, RangeQuery, TributaryError, WriteOutcome, WriteStatus,
};

pub struct FaultyStore {
    inner: Arc<dyn DocumentStore>,
    armed: Mutex<HashMap<String, usize>>,
    injected: Mutex<usize>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashMap::new()),
            injected: Mutex::new(0),
        }
    }

    /// Fail the next `times` puts to `id`.
    pub async fn conflict_on(&self, id: &str, times: usize) {
        self.armed.lock().await.insert(id.to_string(), times);
    }

    /// Disarm every pending fault.
    pub async fn clear_faults(&self) {
        self.armed.lock().await.clear();
    }

    /// Number of conflicts injected so far.
    pub async fn injected(&self) -> usize {
        *self.injected.lock().await
    }

    pub fn inner(&self) -> &Arc<dyn DocumentStore> {
        &self.inner
    }

    async fn should_fail(&self, write: &DocumentWrite) -> bool {
        let DocumentWrite::Put { id, .. } = write else {
            return false;
        };
        let mut armed = self.armed.lock().await;
        match armed.get_mut(id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                *self.injected.lock().await += 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl PluginAdapter for FaultyStore {
    fn name(&self) -> &str {
        "faulty-store"
    }

    fn version(&self) -> semver::Version {
        self.inner.version()
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, TributaryError> {
        self.inner.health_check().await
    }

    async fn shutdown(&self) -> Result<(), TributaryError> {
        self.inner.shutdown().await
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, TributaryError> {
        self.inner.get(id).await
    }

    async fn bulk_update(&self, writes: Vec<DocumentWrite>) -> Result<Vec<WriteOutcome>, TributaryError> {
        // Slot per write: None goes through, Some is the injected outcome.
        let mut slots = Vec::with_capacity(writes.len());
        let mut forwarded = Vec::with_capacity(writes.len());
        for write in writes {
            if self.should_fail(&write).await {
                tracing::debug!(id = write.id(), "injecting write conflict");
                slots.push(Some(WriteOutcome {
                    id: write.id().to_string(),
                    status: WriteStatus::Conflict,
                }));
            } else {
                slots.push(None);
                forwarded.push(write);
            }
        }

        let mut applied = if forwarded.is_empty() {
            Vec::new()
        } else {
            self.inner.bulk_update(forwarded).await?
        }
        .into_iter();

        slots
            .into_iter()
            .map(|slot| match slot {
                Some(outcome) => Ok(outcome),
                None => applied
                    .next()
                    .ok_or_else(|| TributaryError::Internal("inner store returned too few outcomes".into())),
            })
            .collect()
    }

    async fn range_query(&self, query: &RangeQuery) -> Result<Vec<IndexRow>, TributaryError> {
        self.inner.range_query(query).await
    }

    async fn rebuild_indexes(&self) -> Result<usize, TributaryError> {
        self.inner.rebuild_indexes().await
    }
}
