// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable deferred message scheduler.
//!
//! Clients publish `schedule` and `cancel` commands to the
//! `message_scheduler` queue through [`SchedulerClient`]. The
//! [`SchedulerListener`] stores them as [`DeferredMessage`] documents and the
//! [`DeferredDispatcher`] sends each one when it comes due. A message is
//! claimed with a conditional write before it is sent, so concurrent
//! dispatchers never send it twice; a crashed claimant's claim expires and is
//! released on the next startup.

pub mod api;
pub mod commands;
pub mod dispatcher;
pub mod index;
pub mod listener;
pub mod message;

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tributary_bus::{EventBus, MessageDispatch, WorkerHandle};
use tributary_config::model::SchedulerConfig;
use tributary_core::keys::{KEY_HIGH, KeyRange};
use tributary_core::{DocumentStore, DocumentWrite, RangeCursor, RangeQuery, TributaryError};

pub use api::{DeferOptions, DispatchFeedIndexer, INDEX_FEED, SchedulerClient};
pub use commands::{MESSAGE_SCHEDULER, SchedulerCommand};
pub use dispatcher::{DeferredDispatcher, DispatcherSettings};
pub use index::{DEFERRED_BY_TIMESTAMP, scheduler_indexes};
pub use listener::{CommandOutcome, SchedulerListener};
pub use message::{DEFERRED_TYPE, DeferredMessage, DeliveryOptions, Exchange};

/// Declare the scheduler queue. With `purge`, also drop its backlog and
/// every stored deferred message.
pub async fn bootstrap(
    store: &dyn DocumentStore,
    dispatch: &MessageDispatch,
    purge: bool,
) -> Result<usize, TributaryError> {
    info!("setting up scheduler queue");
    dispatch.declare(MESSAGE_SCHEDULER, Some(MESSAGE_SCHEDULER)).await?;
    if !purge {
        return Ok(0);
    }
    info!("clearing scheduler queue");
    dispatch.clear(MESSAGE_SCHEDULER).await?;

    info!("destroying existing deferred messages");
    let everything = KeyRange {
        start: String::new(),
        end: KEY_HIGH.to_string(),
    };
    let query = RangeQuery::range(DEFERRED_BY_TIMESTAMP, everything).include_docs();
    let rows = RangeCursor::new(store, query, 100).collect_all().await?;
    let deletes: Vec<DocumentWrite> = rows
        .into_iter()
        .filter_map(|row| row.doc.map(|doc| DocumentWrite::delete(doc.id, doc.rev)))
        .collect();
    if deletes.is_empty() {
        return Ok(0);
    }
    let outcomes = store.bulk_update(deletes).await?;
    Ok(outcomes.iter().filter(|o| o.is_ok()).count())
}

/// The listener and dispatcher as one unit.
pub struct Scheduler {
    store: Arc<dyn DocumentStore>,
    dispatch: MessageDispatch,
    events: Option<Arc<EventBus>>,
    settings: DispatcherSettings,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DocumentStore>, dispatch: MessageDispatch) -> Self {
        Self {
            store,
            dispatch,
            events: None,
            settings: DispatcherSettings::default(),
        }
    }

    pub fn from_config(store: Arc<dyn DocumentStore>, dispatch: MessageDispatch, config: &SchedulerConfig) -> Self {
        Self::new(store, dispatch).with_settings(DispatcherSettings::from(config))
    }

    /// Enable delivery to `eventbus` targets.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_settings(mut self, settings: DispatcherSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start both loops; they run until `cancel` fires.
    pub async fn start(&self, cancel: CancellationToken) -> Result<SchedulerHandle, TributaryError> {
        let wake = Arc::new(Notify::new());
        let listener = self
            .dispatch
            .start_worker(
                MESSAGE_SCHEDULER,
                Arc::new(SchedulerListener::new(self.store.clone(), wake.clone())),
                Some(MESSAGE_SCHEDULER),
                cancel.clone(),
            )
            .await?;
        let dispatcher = DeferredDispatcher::new(
            self.store.clone(),
            self.dispatch.clone(),
            self.events.clone(),
            self.settings,
            wake,
        );
        let dispatcher = tokio::spawn(dispatcher.run(cancel));
        Ok(SchedulerHandle { listener, dispatcher })
    }
}

/// Running scheduler loops.
pub struct SchedulerHandle {
    listener: WorkerHandle,
    dispatcher: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for both loops to stop after cancellation.
    pub async fn join(self) {
        self.listener.join().await;
        if let Err(e) = self.dispatcher.await {
            error!(error = %e, "deferred dispatcher task failed");
        }
    }
}
