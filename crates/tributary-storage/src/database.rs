// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! The document store and the durable broker share one [`Database`] by cloning
//! it; do NOT open additional connections for writes.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};
use tributary_core::TributaryError;

use crate::migrations::run_migrations;

/// Convert a tokio-rusqlite error into `TributaryError::Storage`.
pub(crate) fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> TributaryError {
    TributaryError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the single-writer SQLite connection.
///
/// Cloning is cheap; every clone talks to the same background thread.
#[derive(Clone)]
pub struct Database {
    conn: tokio_rusqlite::Connection,
    path: String,
}

impl Database {
    /// Open (creating if needed) the database at `path` in WAL mode and run migrations.
    pub async fn open(path: &str) -> Result<Self, TributaryError> {
        Self::open_with(path, true).await
    }

    /// Open the database, choosing the journal mode explicitly.
    pub async fn open_with(path: &str, wal_mode: bool) -> Result<Self, TributaryError> {
        let parent = Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent).map_err(|e| TributaryError::Storage {
                source: Box::new(e),
            })?;
        }

        // Migrations run on a short-lived blocking connection before the
        // writer thread starts.
        let migrate_path = path.to_string();
        let applied = tokio::task::spawn_blocking(move || -> Result<usize, TributaryError> {
            let mut conn = rusqlite::Connection::open(&migrate_path).map_err(|e| {
                TributaryError::Storage {
                    source: Box::new(e),
                }
            })?;
            run_migrations(&mut conn)
        })
        .await
        .map_err(|e| TributaryError::Internal(format!("migration task failed: {e}")))??;
        if applied > 0 {
            info!(path, applied, "database migrations applied");
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| TributaryError::Storage {
                source: Box::new(e),
            })?;

        let journal_mode = if wal_mode { "WAL" } else { "DELETE" };
        conn.call(move |conn| -> Result<(), rusqlite::Error> {
            conn.busy_timeout(Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", journal_mode, |row| {
                row.get::<_, String>(0)
            })?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;

        debug!(path, journal_mode, "database opened");
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    /// Filesystem path this database was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Flush the WAL into the main database file.
    pub async fn checkpoint(&self) -> Result<(), TributaryError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.query_row("PRAGMA wal_checkpoint(TRUNCATE);", [], |_| Ok(()))?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Checkpoint and close the connection.
    ///
    /// Other clones of this handle fail with a closed-connection error afterwards.
    pub async fn close(self) -> Result<(), TributaryError> {
        self.checkpoint().await?;
        self.conn.close().await.map_err(|e| TributaryError::Storage {
            source: Box::new(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_file_and_parent_dirs() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/deeper/test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        assert!(db_path.exists());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn open_twice_reuses_migrated_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("twice.db");
        let path = db_path.to_str().unwrap();

        let db = Database::open(path).await.unwrap();
        db.close().await.unwrap();

        let db = Database::open(path).await.unwrap();
        let tables: i64 = db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                     AND name IN ('documents', 'index_entries', 'queue', 'queue_bindings')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        assert_eq!(tables, 4);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn wal_mode_is_enabled() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("wal.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let mode: String = db
            .connection()
            .call(|conn| -> Result<String, rusqlite::Error> {
                conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        db.close().await.unwrap();
    }
}
