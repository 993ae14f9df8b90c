// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batched iteration over an index range.

use crate::document::{IndexRow, RangeQuery};
use crate::error::TributaryError;
use crate::traits::DocumentStore;

/// Walks a [`RangeQuery`] in pages of at most `batch_size` rows.
///
/// Each page resumes strictly after the last `(key, doc_id)` seen, so rows
/// written behind the cursor are not revisited and memory stays bounded.
/// A `limit` on the query caps the total number of rows returned.
pub struct RangeCursor<'a> {
    store: &'a dyn DocumentStore,
    query: RangeQuery,
    batch_size: usize,
    remaining: Option<usize>,
    exhausted: bool,
}

impl<'a> RangeCursor<'a> {
    pub fn new(store: &'a dyn DocumentStore, query: RangeQuery, batch_size: usize) -> Self {
        let remaining = query.limit;
        Self {
            store,
            query,
            batch_size: batch_size.max(1),
            remaining,
            exhausted: false,
        }
    }

    /// Fetch the next page, or `None` once the range is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<IndexRow>>, TributaryError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = match self.remaining {
            Some(0) => {
                self.exhausted = true;
                return Ok(None);
            }
            Some(n) => n.min(self.batch_size),
            None => self.batch_size,
        };

        let mut query = self.query.clone();
        query.limit = Some(page);
        let rows = self.store.range_query(&query).await?;

        if rows.len() < page {
            self.exhausted = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(rows.len());
        }
        match rows.last() {
            Some(last) => {
                self.query.resume_after = Some((last.key.clone(), last.doc_id.clone()));
                Ok(Some(rows))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Drain the cursor into one vector.
    pub async fn collect_all(mut self) -> Result<Vec<IndexRow>, TributaryError> {
        let mut all = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            all.extend(batch);
        }
        Ok(all)
    }
}
