// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned document store with index range queries.

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{Document, DocumentWrite, IndexRow, RangeQuery, WriteOutcome};
use crate::error::TributaryError;
use crate::traits::adapter::PluginAdapter;

/// The single source of truth for buckets, items, and deferred messages.
///
/// Concurrency control is optimistic: every write names the revision it was
/// read at, and mismatches come back per document from [`bulk_update`].
///
/// [`bulk_update`]: DocumentStore::bulk_update
#[async_trait]
pub trait DocumentStore: PluginAdapter {
    /// Fetch a document by id.
    async fn get(&self, id: &str) -> Result<Option<Document>, TributaryError>;

    /// Apply a batch of writes.
    ///
    /// Each write succeeds or fails independently; the returned outcomes are
    /// in the same order as `writes`. An `Err` means the batch could not be
    /// attempted at all.
    async fn bulk_update(
        &self,
        writes: Vec<DocumentWrite>,
    ) -> Result<Vec<WriteOutcome>, TributaryError>;

    /// Return one page of index rows in key order.
    async fn range_query(&self, query: &RangeQuery) -> Result<Vec<IndexRow>, TributaryError>;

    /// Recompute every registered index from stored documents.
    ///
    /// Returns the number of documents indexed.
    async fn rebuild_indexes(&self) -> Result<usize, TributaryError>;

    /// Create or replace a single document, failing on conflict.
    async fn put(
        &self,
        id: &str,
        rev: Option<u64>,
        body: Value,
    ) -> Result<u64, TributaryError> {
        let outcome = self
            .bulk_update(vec![DocumentWrite::put(id, rev, body)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TributaryError::Internal(format!("no write outcome for {id}")))?;
        outcome.into_result()
    }

    /// Delete a single document, failing on conflict or absence.
    async fn delete(&self, id: &str, rev: u64) -> Result<(), TributaryError> {
        let outcome = self
            .bulk_update(vec![DocumentWrite::delete(id, rev)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TributaryError::Internal(format!("no write outcome for {id}")))?;
        outcome.into_result().map(|_| ())
    }
}
