// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable work queues stored in the same SQLite database as documents.
//!
//! Each message row moves `pending -> processing -> completed`. A row in
//! `processing` holds a lease (`locked_until`); if its consumer dies before
//! acknowledging, the lease expires and the row is handed out again. A row
//! claimed for a `receive` that was dropped in the meantime goes straight back
//! to `pending`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::params;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use tributary_core::types::MAX_PRIORITY;
use tributary_core::{
    AdapterType, Delivery, HealthStatus, MessageBroker, PluginAdapter, PublishOptions,
    TributaryError,
};

use crate::database::{Database, map_tr_err};

/// [`MessageBroker`] backed by the `queue` and `queue_bindings` tables.
#[derive(Clone)]
pub struct SqliteBroker {
    db: Database,
    poll_interval: Duration,
    lock_timeout: Duration,
    notify: Arc<Notify>,
}

impl SqliteBroker {
    pub fn new(db: Database, poll_interval: Duration, lock_timeout: Duration) -> Self {
        Self {
            db,
            poll_interval,
            lock_timeout,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Return every expired lease to `pending`.
    ///
    /// Run once at startup; `receive` also picks up expired leases lazily.
    pub async fn recover_stale(&self) -> Result<usize, TributaryError> {
        let recovered = self
            .db
            .connection()
            .call(|conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE queue SET status = 'pending', locked_until = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE status = 'processing'
                       AND locked_until < strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    [],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if recovered > 0 {
            info!(recovered, "recovered stale queue leases");
        }
        Ok(recovered)
    }

    /// Take the next deliverable row from `queue`, if any.
    async fn dequeue(&self, queue: &str) -> Result<Option<Delivery>, TributaryError> {
        let queue_name = queue.to_string();
        let lease_secs = self.lock_timeout.as_secs().max(1) as i64;
        let row = self
            .db
            .connection()
            .call(move |conn| -> Result<Option<(i64, String, i64)>, rusqlite::Error> {
                let tx = conn.transaction()?;
                let next: Result<(i64, String, i64), rusqlite::Error> = tx.query_row(
                    "SELECT id, payload, attempts FROM queue
                     WHERE queue_name = ?1
                       AND (status = 'pending'
                            OR (status = 'processing'
                                AND locked_until < strftime('%Y-%m-%dT%H:%M:%fZ', 'now')))
                     ORDER BY priority DESC, id ASC
                     LIMIT 1",
                    params![queue_name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                );
                match next {
                    Ok((id, payload, attempts)) => {
                        tx.execute(
                            "UPDATE queue SET status = 'processing', attempts = attempts + 1,
                             locked_until = strftime('%Y-%m-%dT%H:%M:%fZ', 'now',
                                                     '+' || ?2 || ' seconds'),
                             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                             WHERE id = ?1",
                            params![id, lease_secs],
                        )?;
                        tx.commit()?;
                        Ok(Some((id, payload, attempts + 1)))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => {
                        tx.commit()?;
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
            .map_err(map_tr_err)?;

        match row {
            Some((tag, payload, attempts)) => Ok(Some(Delivery {
                queue: queue.to_string(),
                tag,
                payload: serde_json::from_str(&payload)?,
                redelivered: attempts > 1,
            })),
            None => Ok(None),
        }
    }

    /// Run [`Self::dequeue`] on its own task.
    ///
    /// The claim commits on the database thread whether or not the caller is
    /// still waiting, so the task owns the result and releases the row if
    /// nobody is left to take it.
    async fn claim(&self, queue: &str) -> Result<Option<Delivery>, TributaryError> {
        let (tx, rx) = oneshot::channel();
        let broker = self.clone();
        let queue_name = queue.to_string();
        tokio::spawn(async move {
            let claimed = broker.dequeue(&queue_name).await;
            if let Err(Ok(Some(delivery))) = tx.send(claimed) {
                match broker.release(&delivery).await {
                    Ok(()) => debug!(tag = delivery.tag, "released abandoned queue claim"),
                    Err(e) => warn!(
                        tag = delivery.tag,
                        error = %e,
                        "failed to release abandoned queue claim; it returns when its lease expires"
                    ),
                }
            }
        });
        rx.await.map_err(|_| {
            TributaryError::Internal("queue claim task ended without a result".into())
        })?
    }
}

#[async_trait]
impl PluginAdapter for SqliteBroker {
    fn name(&self) -> &str {
        "sqlite-broker"
    }

    fn version(&self) -> semver::Version {
        semver::Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(semver::Version::new(0, 1, 0))
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Broker
    }

    async fn health_check(&self) -> Result<HealthStatus, TributaryError> {
        let stuck = self
            .db
            .connection()
            .call(|conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM queue WHERE status = 'processing'
                     AND locked_until < strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_tr_err)?;
        if stuck > 0 {
            return Ok(HealthStatus::Degraded(format!(
                "{stuck} queue messages with expired leases"
            )));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TributaryError> {
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for SqliteBroker {
    async fn declare(&self, message_type: &str, queue: &str) -> Result<(), TributaryError> {
        let message_type = message_type.to_string();
        let queue_name = queue.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO queue_bindings (message_type, queue_name)
                     VALUES (?1, ?2)",
                    params![message_type, queue_name],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn publish(
        &self,
        message_type: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> Result<usize, TributaryError> {
        let body = serde_json::to_string(payload)?;
        let priority = options.priority.min(MAX_PRIORITY) as i64;
        let bound_type = message_type.to_string();
        let routed = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                let queues = {
                    let mut stmt = tx.prepare_cached(
                        "SELECT queue_name FROM queue_bindings WHERE message_type = ?1",
                    )?;
                    stmt.query_map(params![bound_type], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                for queue_name in &queues {
                    tx.execute(
                        "INSERT INTO queue (queue_name, payload, priority) VALUES (?1, ?2, ?3)",
                        params![queue_name, body, priority],
                    )?;
                }
                tx.commit()?;
                Ok(queues.len())
            })
            .await
            .map_err(map_tr_err)?;

        if routed == 0 {
            if options.mandatory {
                return Err(TributaryError::Unroutable {
                    message_type: message_type.to_string(),
                });
            }
            debug!(message_type, "published message matched no queue");
        } else {
            self.notify.notify_waiters();
        }
        Ok(routed)
    }

    async fn receive(&self, queue: &str) -> Result<Delivery, TributaryError> {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.claim(queue).await? {
                return Ok(delivery);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TributaryError> {
        let id = delivery.tag;
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                conn.execute(
                    "UPDATE queue SET status = 'completed', locked_until = NULL,
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), TributaryError> {
        let id = delivery.tag;
        let released = self
            .db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "UPDATE queue SET status = 'pending', locked_until = NULL,
                     attempts = MAX(attempts - 1, 0),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1 AND status = 'processing'",
                    params![id],
                )
            })
            .await
            .map_err(map_tr_err)?;
        if released > 0 {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<usize, TributaryError> {
        let queue_name = queue.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                conn.execute(
                    "DELETE FROM queue WHERE queue_name = ?1 AND status != 'processing'",
                    params![queue_name],
                )
            })
            .await
            .map_err(map_tr_err)
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TributaryError> {
        let queue_name = queue.to_string();
        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM queue WHERE queue_name = ?1", params![queue_name])?;
                tx.execute(
                    "DELETE FROM queue_bindings WHERE queue_name = ?1",
                    params![queue_name],
                )?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }

    async fn pending(&self, queue: &str) -> Result<usize, TributaryError> {
        let queue_name = queue.to_string();
        let count = self
            .db
            .connection()
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM queue
                     WHERE queue_name = ?1 AND status IN ('pending', 'processing')",
                    params![queue_name],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(map_tr_err)?;
        Ok(count as usize)
    }
}
