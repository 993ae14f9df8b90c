// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed versioned document store with maintained indexes.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;
use tracing::{debug, info};
use tributary_core::{
    AdapterType, Document, DocumentStore, DocumentWrite, HealthStatus, IndexDefinition, IndexRow,
    PluginAdapter, RangeQuery, TributaryError, WriteOutcome, WriteStatus,
};

use crate::database::{Database, map_tr_err};

/// Documents scanned per round trip while rebuilding indexes.
const REBUILD_PAGE: usize = 500;

/// A write with its body and index rows already serialized.
enum PreparedWrite {
    Put {
        id: String,
        rev: Option<u64>,
        body: String,
        rows: Vec<(String, String, String)>,
    },
    Delete {
        id: String,
        rev: u64,
    },
}

/// [`DocumentStore`] over the `documents` and `index_entries` tables.
///
/// Index definitions are fixed at construction; their rows are rewritten in
/// the same transaction as each document write.
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Database,
    indexes: Arc<Vec<Arc<dyn IndexDefinition>>>,
}

impl SqliteDocumentStore {
    pub fn new(db: Database, indexes: Vec<Arc<dyn IndexDefinition>>) -> Self {
        Self {
            db,
            indexes: Arc::new(indexes),
        }
    }

    /// The database this store writes to.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Serialized `(index_name, key, value)` rows for one document.
    fn index_rows(
        &self,
        id: &str,
        body: &Value,
    ) -> Result<Vec<(String, String, String)>, TributaryError> {
        let mut rows = Vec::new();
        for index in self.indexes.iter() {
            for (key, value) in index.map(id, body) {
                rows.push((index.name().to_string(), key, serde_json::to_string(&value)?));
            }
        }
        Ok(rows)
    }

    fn prepare(&self, write: DocumentWrite) -> Result<PreparedWrite, TributaryError> {
        match write {
            DocumentWrite::Put { id, rev, body } => {
                let rows = self.index_rows(&id, &body)?;
                Ok(PreparedWrite::Put {
                    body: serde_json::to_string(&body)?,
                    id,
                    rev,
                    rows,
                })
            }
            DocumentWrite::Delete { id, rev } => Ok(PreparedWrite::Delete { id, rev }),
        }
    }
}

fn insert_rows(
    tx: &rusqlite::Transaction<'_>,
    doc_id: &str,
    rows: &[(String, String, String)],
) -> Result<(), rusqlite::Error> {
    let mut stmt = tx.prepare_cached(
        "INSERT OR REPLACE INTO index_entries (index_name, key, doc_id, value)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (index_name, key, value) in rows {
        stmt.execute(params![index_name, key, doc_id, value])?;
    }
    Ok(())
}

fn current_rev(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<Option<u64>, rusqlite::Error> {
    match tx.query_row(
        "SELECT rev FROM documents WHERE id = ?1",
        params![id],
        |row| row.get::<_, i64>(0),
    ) {
        Ok(rev) => Ok(Some(rev as u64)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn apply_write(
    tx: &rusqlite::Transaction<'_>,
    write: &PreparedWrite,
) -> Result<WriteStatus, rusqlite::Error> {
    match write {
        PreparedWrite::Put {
            id,
            rev,
            body,
            rows,
        } => {
            let stored = current_rev(tx, id)?;
            if stored != *rev {
                return Ok(WriteStatus::Conflict);
            }
            let new_rev = stored.unwrap_or(0) + 1;
            tx.execute(
                "INSERT INTO documents (id, rev, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET rev = excluded.rev, body = excluded.body,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                params![id, new_rev as i64, body],
            )?;
            tx.execute("DELETE FROM index_entries WHERE doc_id = ?1", params![id])?;
            insert_rows(tx, id, rows)?;
            Ok(WriteStatus::Ok { rev: new_rev })
        }
        PreparedWrite::Delete { id, rev } => match current_rev(tx, id)? {
            None => Ok(WriteStatus::NotFound),
            Some(stored) if stored != *rev => Ok(WriteStatus::Conflict),
            Some(stored) => {
                tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
                tx.execute("DELETE FROM index_entries WHERE doc_id = ?1", params![id])?;
                Ok(WriteStatus::Ok { rev: stored + 1 })
            }
        },
    }
}

fn parse_body(id: &str, body: &str) -> Result<Value, TributaryError> {
    serde_json::from_str(body).map_err(|e| {
        debug!(doc_id = id, error = %e, "stored document body is not valid JSON");
        TributaryError::serialization(e)
    })
}

#[async_trait]
impl PluginAdapter for SqliteDocumentStore {
    fn name(&self) -> &str {
        "sqlite-store"
    }

    fn version(&self) -> semver::Version {
        semver::Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(semver::Version::new(0, 1, 0))
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, TributaryError> {
        self.db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row("SELECT 1", [], |row| row.get(0))
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TributaryError> {
        self.db.checkpoint().await
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<Document>, TributaryError> {
        let lookup = id.to_string();
        let row = self
            .db
            .connection()
            .call(move |conn| -> Result<Option<(i64, String)>, rusqlite::Error> {
                match conn.query_row(
                    "SELECT rev, body FROM documents WHERE id = ?1",
                    params![lookup],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                ) {
                    Ok(found) => Ok(Some(found)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_tr_err)?;

        match row {
            Some((rev, body)) => Ok(Some(Document {
                id: id.to_string(),
                rev: rev as u64,
                body: parse_body(id, &body)?,
            })),
            None => Ok(None),
        }
    }

    async fn bulk_update(
        &self,
        writes: Vec<DocumentWrite>,
    ) -> Result<Vec<WriteOutcome>, TributaryError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let prepared = writes
            .into_iter()
            .map(|w| self.prepare(w))
            .collect::<Result<Vec<_>, _>>()?;

        self.db
            .connection()
            .call(move |conn| -> Result<Vec<WriteOutcome>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let mut outcomes = Vec::with_capacity(prepared.len());
                for write in &prepared {
                    let status = apply_write(&tx, write)?;
                    let id = match write {
                        PreparedWrite::Put { id, .. } | PreparedWrite::Delete { id, .. } => {
                            id.clone()
                        }
                    };
                    outcomes.push(WriteOutcome { id, status });
                }
                tx.commit()?;
                Ok(outcomes)
            })
            .await
            .map_err(map_tr_err)
    }

    async fn range_query(&self, query: &RangeQuery) -> Result<Vec<IndexRow>, TributaryError> {
        let (cmp, order) = if query.descending {
            ("<", "DESC")
        } else {
            (">", "ASC")
        };
        let doc_columns = if query.include_docs {
            "d.rev, d.body"
        } else {
            "NULL, NULL"
        };
        let mut sql = format!(
            "SELECT e.key, e.doc_id, e.value, {doc_columns}
             FROM index_entries e LEFT JOIN documents d ON d.id = e.doc_id
             WHERE e.index_name = ?1 AND e.key >= ?2 AND e.key <= ?3"
        );
        let mut bind: Vec<rusqlite::types::Value> = vec![
            query.index.clone().into(),
            query.start_key.clone().into(),
            query.end_key.clone().into(),
        ];
        if let Some((key, doc_id)) = &query.resume_after {
            sql.push_str(&format!(" AND (e.key, e.doc_id) {cmp} (?4, ?5)"));
            bind.push(key.clone().into());
            bind.push(doc_id.clone().into());
        }
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        sql.push_str(&format!(
            " ORDER BY e.key {order}, e.doc_id {order} LIMIT {limit}"
        ));

        type RawRow = (String, String, String, Option<i64>, Option<String>);
        let raw = self
            .db
            .connection()
            .call(move |conn| -> Result<Vec<RawRow>, rusqlite::Error> {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(bind), |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_tr_err)?;

        raw.into_iter()
            .map(|(key, doc_id, value, rev, body)| {
                let doc = match (rev, body) {
                    (Some(rev), Some(body)) => Some(Document {
                        id: doc_id.clone(),
                        rev: rev as u64,
                        body: parse_body(&doc_id, &body)?,
                    }),
                    _ => None,
                };
                Ok(IndexRow {
                    value: serde_json::from_str(&value)?,
                    key,
                    doc_id,
                    doc,
                })
            })
            .collect()
    }

    async fn rebuild_indexes(&self) -> Result<usize, TributaryError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM index_entries", [])?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;

        let mut indexed = 0usize;
        let mut last_id = String::new();
        loop {
            let after = last_id.clone();
            let page = self
                .db
                .connection()
                .call(move |conn| -> Result<Vec<(String, String)>, rusqlite::Error> {
                    let mut stmt = conn.prepare(
                        "SELECT id, body FROM documents WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![after, REBUILD_PAGE as i64], |row| {
                            Ok((row.get(0)?, row.get(1)?))
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await
                .map_err(map_tr_err)?;

            let Some((tail, _)) = page.last() else {
                break;
            };
            last_id = tail.clone();
            let count = page.len();

            let mut batch = Vec::with_capacity(count);
            for (id, body) in page {
                let body = parse_body(&id, &body)?;
                let rows = self.index_rows(&id, &body)?;
                batch.push((id, rows));
            }
            self.db
                .connection()
                .call(move |conn| -> Result<(), rusqlite::Error> {
                    let tx = conn.transaction()?;
                    for (id, rows) in &batch {
                        insert_rows(&tx, id, rows)?;
                    }
                    tx.commit()
                })
                .await
                .map_err(map_tr_err)?;

            indexed += count;
            if count < REBUILD_PAGE {
                break;
            }
        }

        info!(documents = indexed, "indexes rebuilt");
        Ok(indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tributary_core::keys::{KeyRange, compound_key};

    /// Indexes every document by `[kind, name]`.
    struct ByKind;

    impl IndexDefinition for ByKind {
        fn name(&self) -> &str {
            "by_kind"
        }

        fn map(&self, _doc_id: &str, body: &Value) -> Vec<(String, Value)> {
            match (body["kind"].as_str(), body["name"].as_str()) {
                (Some(kind), Some(name)) => vec![(compound_key(&[kind, name]), json!(name))],
                _ => Vec::new(),
            }
        }
    }

    async fn setup() -> (SqliteDocumentStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (SqliteDocumentStore::new(db, vec![Arc::new(ByKind)]), dir)
    }

    #[tokio::test]
    async fn put_then_get_returns_latest_revision() {
        let (store, _dir) = setup().await;

        let rev = store.put("a", None, json!({"n": 1})).await.unwrap();
        assert_eq!(rev, 1);
        let rev = store.put("a", Some(1), json!({"n": 2})).await.unwrap();
        assert_eq!(rev, 2);

        let doc = store.get("a").await.unwrap().unwrap();
        assert_eq!(doc.rev, 2);
        assert_eq!(doc.body["n"], 2);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let (store, _dir) = setup().await;
        store.put("a", None, json!({})).await.unwrap();

        let err = store.put("a", None, json!({})).await.unwrap_err();
        assert!(err.is_conflict());
        let err = store.put("b", Some(4), json!({})).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn bulk_update_reports_each_document() {
        let (store, _dir) = setup().await;
        store.put("existing", None, json!({})).await.unwrap();

        let outcomes = store
            .bulk_update(vec![
                DocumentWrite::put("existing", None, json!({})),
                DocumentWrite::put("fresh", None, json!({"kind": "x", "name": "f"})),
                DocumentWrite::delete("ghost", 1),
            ])
            .await
            .unwrap();

        assert_eq!(outcomes[0].status, WriteStatus::Conflict);
        assert_eq!(outcomes[1].status, WriteStatus::Ok { rev: 1 });
        assert_eq!(outcomes[2].status, WriteStatus::NotFound);
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn index_rows_follow_document_writes() {
        let (store, _dir) = setup().await;
        store
            .put("d1", None, json!({"kind": "feed", "name": "alpha"}))
            .await
            .unwrap();
        store
            .put("d2", None, json!({"kind": "feed", "name": "beta"}))
            .await
            .unwrap();
        store
            .put("d3", None, json!({"kind": "tweet", "name": "gamma"}))
            .await
            .unwrap();

        let feeds = RangeQuery::range("by_kind", KeyRange::prefix(&["feed"]));
        let rows = store.range_query(&feeds).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2"]);

        // Rewriting a document replaces its rows.
        store
            .put("d1", Some(1), json!({"kind": "tweet", "name": "alpha"}))
            .await
            .unwrap();
        let rows = store.range_query(&feeds).await.unwrap();
        assert_eq!(rows.len(), 1);

        store.delete("d2", 1).await.unwrap();
        assert!(store.range_query(&feeds).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_query_pages_descending_with_docs() {
        let (store, _dir) = setup().await;
        for name in ["a", "b", "c", "d"] {
            store
                .put(name, None, json!({"kind": "k", "name": name}))
                .await
                .unwrap();
        }

        let query = RangeQuery::range("by_kind", KeyRange::prefix(&["k"]))
            .descending()
            .include_docs()
            .limit(2);
        let first = store.range_query(&query).await.unwrap();
        assert_eq!(first[0].doc_id, "d");
        assert_eq!(first[1].doc_id, "c");
        assert_eq!(first[0].doc.as_ref().unwrap().body["name"], "d");

        let mut next = query.clone();
        next.resume_after = Some((first[1].key.clone(), first[1].doc_id.clone()));
        let second = store.range_query(&next).await.unwrap();
        let ids: Vec<_> = second.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn range_cursor_walks_all_rows_in_batches() {
        let (store, _dir) = setup().await;
        for i in 0..7 {
            let name = format!("n{i}");
            store
                .put(&name, None, json!({"kind": "k", "name": name}))
                .await
                .unwrap();
        }

        let query = RangeQuery::range("by_kind", KeyRange::prefix(&["k"]));
        let mut cursor = tributary_core::RangeCursor::new(&store, query, 3);
        let mut sizes = Vec::new();
        while let Some(batch) = cursor.next_batch().await.unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn rebuild_indexes_restores_rows() {
        let (store, _dir) = setup().await;
        store
            .put("d1", None, json!({"kind": "feed", "name": "alpha"}))
            .await
            .unwrap();
        store
            .database()
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute("DELETE FROM index_entries", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let count = store.rebuild_indexes().await.unwrap();
        assert_eq!(count, 1);
        let rows = store
            .range_query(&RangeQuery::exact("by_kind", compound_key(&["feed", "alpha"])))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
