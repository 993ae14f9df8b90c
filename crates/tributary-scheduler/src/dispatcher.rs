// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sends deferred messages when they come due.
//!
//! Each pass pages through due, unclaimed messages in timestamp order,
//! claims each one, publishes it, and deletes it. A failed publish releases
//! the claim with an exponentially later send time. Between passes the loop
//! sleeps until the next known due time, bounded by the configured minimum
//! and maximum, or until the listener wakes it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_bus::{EventBus, MessageDispatch};
use tributary_config::model::SchedulerConfig;
use tributary_core::keys::{KEY_HIGH, KeyRange, bool_key, time_key};
use tributary_core::{DocumentStore, IndexRow, RangeQuery, TributaryError};
use tributary_resilience::backoff::{DEFAULT_CAP_EXPONENT, DEFAULT_MAX_DELAY};
use tributary_resilience::capped_delay;

use crate::index::{DEFERRED_BY_TIMESTAMP, key_time};
use crate::message::{DeferredMessage, Exchange};

/// Timing knobs for [`DeferredDispatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    pub min_sleep: Duration,
    pub max_sleep: Duration,
    /// Claims older than this are presumed abandoned.
    pub max_claim: Duration,
    pub batch_size: usize,
    pub max_backoff_exponent: u32,
    pub max_retry_delay: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            min_sleep: Duration::from_secs(1),
            max_sleep: Duration::from_secs(3_600),
            max_claim: Duration::from_secs(300),
            batch_size: 100,
            max_backoff_exponent: DEFAULT_CAP_EXPONENT,
            max_retry_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl From<&SchedulerConfig> for DispatcherSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            min_sleep: config.min_sleep(),
            max_sleep: config.max_sleep(),
            max_claim: config.max_claim(),
            batch_size: config.batch_size.max(1),
            max_backoff_exponent: config.max_backoff_exponent,
            max_retry_delay: Duration::from_secs(config.max_retry_delay_secs),
        }
    }
}

/// How long to sleep when the next due message is at `next`.
///
/// Rounds up to the next whole second past `next`, then clamps.
pub fn sleep_until_next(
    next: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min: Duration,
    max: Duration,
) -> Duration {
    let wait = match next {
        None => max,
        Some(next) => {
            let until = (next - now).to_std().unwrap_or(Duration::ZERO) + Duration::from_secs(1);
            Duration::from_secs(until.as_secs())
        }
    };
    wait.clamp(min, max.max(min))
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(365))
}

pub struct DeferredDispatcher {
    store: Arc<dyn DocumentStore>,
    dispatch: MessageDispatch,
    events: Option<Arc<EventBus>>,
    settings: DispatcherSettings,
    wake: Arc<Notify>,
}

impl DeferredDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        dispatch: MessageDispatch,
        events: Option<Arc<EventBus>>,
        settings: DispatcherSettings,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            dispatch,
            events,
            settings,
            wake,
        }
    }

    /// Clean up stale claims, then send due messages until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("deferred dispatcher started");
        if let Err(e) = self.cleanup().await {
            error!(error = %e, "stale claim cleanup failed");
        }
        loop {
            let checked_at = match self.send_ready_messages().await {
                Ok(checked_at) => checked_at,
                Err(e) => {
                    error!(error = %e, "failed to send ready messages");
                    Utc::now()
                }
            };
            let next = match self.next_send_time(checked_at).await {
                Ok(next) => next,
                Err(e) => {
                    warn!(error = %e, "failed to find next send time");
                    None
                }
            };
            let sleep = sleep_until_next(next, Utc::now(), self.settings.min_sleep, self.settings.max_sleep);
            debug!(sleep_ms = sleep.as_millis() as u64, "dispatcher sleeping");

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.wake.notified() => debug!("dispatcher woken"),
                _ = cancel.cancelled() => break,
            }
        }
        info!("deferred dispatcher stopped");
    }

    async fn page(&self, range: KeyRange) -> Result<Vec<IndexRow>, TributaryError> {
        let query = RangeQuery::range(DEFERRED_BY_TIMESTAMP, range)
            .limit(self.settings.batch_size)
            .include_docs();
        self.store.range_query(&query).await
    }

    /// Send everything due. Returns the time of the last due check.
    pub async fn send_ready_messages(&self) -> Result<DateTime<Utc>, TributaryError> {
        loop {
            let now = Utc::now();
            let due = KeyRange::between(&[bool_key(false)], "", &time_key(&now));
            let rows = self.page(due).await?;
            if rows.is_empty() {
                return Ok(now);
            }

            let mut progressed = 0;
            let mut dispatched = 0;
            for row in rows {
                let Some(doc) = row.doc else { continue };
                let mut msg = match DeferredMessage::from_document(&doc) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(id = %doc.id, error = %e, "skipping unreadable deferred message");
                        continue;
                    }
                };
                match self.dispatch_message(&mut msg).await {
                    Ok(sent) => {
                        progressed += 1;
                        if sent {
                            dispatched += 1;
                        }
                    }
                    Err(e) => error!(id = %msg.id(), error = %e, "unexpected error dispatching deferred message"),
                }
            }
            info!(dispatched, "dispatched deferred messages");
            // Nothing in this page moved; stop rather than spin on it.
            if progressed == 0 {
                return Ok(now);
            }
        }
    }

    /// Claim and publish one message. Returns true if it was sent.
    pub async fn dispatch_message(&self, msg: &mut DeferredMessage) -> Result<bool, TributaryError> {
        let store = self.store.as_ref();
        if !msg.claim(store).await? {
            return Ok(false);
        }
        match self.publish(msg).await {
            Ok(()) => {
                debug!(id = %msg.id(), routing_key = %msg.options.routing_key, "dispatched deferred message");
                match msg.delete(store).await {
                    Ok(()) | Err(TributaryError::NotFound { .. }) => Ok(true),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                error!(id = %msg.id(), error = %e, "error dispatching deferred message");
                self.error_reschedule(msg).await?;
                Ok(false)
            }
        }
    }

    async fn publish(&self, msg: &DeferredMessage) -> Result<(), TributaryError> {
        match msg.options.exchange {
            Exchange::WorkDispatch => {
                self.dispatch
                    .send_with(&msg.options.routing_key, &msg.message, &msg.options.publish_options())
                    .await?;
            }
            Exchange::EventBus => {
                let events = self
                    .events
                    .as_ref()
                    .ok_or_else(|| TributaryError::broker("no event bus attached to scheduler"))?;
                events.send(&msg.options.routing_key, msg.message.clone());
            }
        }
        Ok(())
    }

    /// Release the claim and push the send time out by the backoff delay.
    pub async fn error_reschedule(&self, msg: &mut DeferredMessage) -> Result<(), TributaryError> {
        msg.error_count = msg.error_count.saturating_add(1);
        let delay = capped_delay(
            msg.error_count,
            self.settings.max_backoff_exponent,
            self.settings.max_retry_delay,
        );
        let at = Utc::now() + to_delta(delay);
        msg.unclaim(self.store.as_ref(), Some(at)).await?;
        warn!(id = %msg.id(), error_count = msg.error_count, at = %at, "rescheduled deferred message");
        Ok(())
    }

    /// Earliest unclaimed send time after `after`.
    pub async fn next_send_time(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, TributaryError> {
        let range = KeyRange::between(&[bool_key(false)], &time_key(&after), &KEY_HIGH.to_string());
        let query = RangeQuery::range(DEFERRED_BY_TIMESTAMP, range).limit(1);
        let rows = self.store.range_query(&query).await?;
        Ok(rows.first().and_then(|row| key_time(&row.key)))
    }

    /// Return claims older than the staleness threshold to pending.
    pub async fn cleanup(&self) -> Result<usize, TributaryError> {
        info!("cleaning up stale claims");
        let cutoff = Utc::now() - to_delta(self.settings.max_claim);
        let mut reclaimed = 0;
        loop {
            let stale = KeyRange::between(&[bool_key(true)], "", &time_key(&cutoff));
            let rows = self.page(stale).await?;
            let mut progressed = 0;
            for row in rows {
                let Some(doc) = row.doc else { continue };
                let Ok(mut msg) = DeferredMessage::from_document(&doc) else {
                    warn!(id = %doc.id, "skipping unreadable deferred message");
                    continue;
                };
                match self.error_reschedule(&mut msg).await {
                    Ok(()) => {
                        reclaimed += 1;
                        progressed += 1;
                    }
                    Err(e) if e.is_conflict() => progressed += 1,
                    Err(e) => return Err(e),
                }
            }
            if progressed == 0 {
                break;
            }
        }
        if reclaimed > 0 {
            warn!(reclaimed, "released stale claims");
        }
        Ok(reclaimed)
    }
}
