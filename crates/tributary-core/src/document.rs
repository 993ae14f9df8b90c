// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned documents, bulk write outcomes, and index queries.
//!
//! Every document carries an integer revision. A write must name the revision
//! it was read at (or `None` for a new document); a mismatch is reported per
//! document as [`WriteStatus::Conflict`] rather than failing the whole batch.

use serde_json::Value;

use crate::error::TributaryError;

/// A stored document at a specific revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub rev: u64,
    pub body: Value,
}

/// One entry of a bulk update.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentWrite {
    /// Create (`rev: None`) or replace (`rev: Some(current)`) a document.
    Put {
        id: String,
        rev: Option<u64>,
        body: Value,
    },
    /// Delete a document at its current revision.
    Delete { id: String, rev: u64 },
}

impl DocumentWrite {
    pub fn put(id: impl Into<String>, rev: Option<u64>, body: Value) -> Self {
        DocumentWrite::Put {
            id: id.into(),
            rev,
            body,
        }
    }

    pub fn delete(id: impl Into<String>, rev: u64) -> Self {
        DocumentWrite::Delete { id: id.into(), rev }
    }

    /// The id of the document this write targets.
    pub fn id(&self) -> &str {
        match self {
            DocumentWrite::Put { id, .. } | DocumentWrite::Delete { id, .. } => id,
        }
    }
}

/// Result of a single document write inside a bulk update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Written; carries the new revision.
    Ok { rev: u64 },
    /// The supplied revision did not match the stored one.
    Conflict,
    /// Delete of a document that does not exist.
    NotFound,
}

/// Per-document result of [`crate::DocumentStore::bulk_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub id: String,
    pub status: WriteStatus,
}

impl WriteOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, WriteStatus::Ok { .. })
    }

    /// New revision if the write succeeded.
    pub fn rev(&self) -> Option<u64> {
        match self.status {
            WriteStatus::Ok { rev } => Some(rev),
            _ => None,
        }
    }

    /// Converts a failed outcome into the matching error.
    pub fn into_result(self) -> Result<u64, TributaryError> {
        match self.status {
            WriteStatus::Ok { rev } => Ok(rev),
            WriteStatus::Conflict => Err(TributaryError::Conflict { id: self.id }),
            WriteStatus::NotFound => Err(TributaryError::NotFound { id: self.id }),
        }
    }
}

/// Maps documents to index rows.
///
/// Implementations must be pure: the same body always yields the same rows.
/// Rows are maintained by the store in the same transaction as the write.
pub trait IndexDefinition: Send + Sync {
    /// Unique index name used in [`RangeQuery::index`].
    fn name(&self) -> &str;

    /// Emit zero or more `(key, value)` rows for a document.
    fn map(&self, doc_id: &str, body: &Value) -> Vec<(String, Value)>;
}

/// An inclusive key-range query over a named index.
///
/// `start_key <= end_key` always; `descending` only flips the iteration
/// order. `resume_after` continues strictly past a previously returned row.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub index: String,
    pub start_key: String,
    pub end_key: String,
    pub limit: Option<usize>,
    pub descending: bool,
    pub include_docs: bool,
    pub resume_after: Option<(String, String)>,
}

impl RangeQuery {
    pub fn new(
        index: impl Into<String>,
        start_key: impl Into<String>,
        end_key: impl Into<String>,
    ) -> Self {
        Self {
            index: index.into(),
            start_key: start_key.into(),
            end_key: end_key.into(),
            limit: None,
            descending: false,
            include_docs: false,
            resume_after: None,
        }
    }

    /// Query every row whose key equals `key`.
    pub fn exact(index: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(index, key.clone(), key)
    }

    /// Query a precomputed key range.
    pub fn range(index: impl Into<String>, range: crate::keys::KeyRange) -> Self {
        Self::new(index, range.start, range.end)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }
}

/// One row returned by a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub key: String,
    pub doc_id: String,
    pub value: Value,
    /// The document, when the query asked for `include_docs`.
    pub doc: Option<Document>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_outcome_maps_to_errors() {
        let ok = WriteOutcome {
            id: "a".into(),
            status: WriteStatus::Ok { rev: 3 },
        };
        assert!(ok.is_ok());
        assert_eq!(ok.rev(), Some(3));
        assert_eq!(ok.into_result().unwrap(), 3);

        let conflict = WriteOutcome {
            id: "b".into(),
            status: WriteStatus::Conflict,
        };
        assert!(conflict.into_result().unwrap_err().is_conflict());

        let missing = WriteOutcome {
            id: "c".into(),
            status: WriteStatus::NotFound,
        };
        assert!(matches!(
            missing.into_result(),
            Err(TributaryError::NotFound { .. })
        ));
    }

    #[test]
    fn document_write_reports_target_id() {
        assert_eq!(DocumentWrite::put("x", None, json!({})).id(), "x");
        assert_eq!(DocumentWrite::delete("y", 2).id(), "y");
    }

    #[test]
    fn range_query_builders() {
        let q = RangeQuery::exact("idx", "k").limit(10).descending().include_docs();
        assert_eq!(q.start_key, "k");
        assert_eq!(q.end_key, "k");
        assert_eq!(q.limit, Some(10));
        assert!(q.descending);
        assert!(q.include_docs);
        assert!(q.resume_after.is_none());
    }
}
