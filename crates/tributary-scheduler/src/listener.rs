// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stores and cancels deferred messages on command.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use tributary_bus::MessageHandler;
use tributary_core::{DocumentStore, TributaryError};

use crate::commands::{SchedulerCommand, delivery_options};
use crate::message::{DeferredMessage, DeliveryOptions};

/// What a command did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Scheduled { id: String },
    Cancelled { id: String },
    /// Logged and dropped: malformed, too late, or already gone.
    Ignored,
    Noop,
}

/// Applies scheduler commands, then wakes the dispatcher.
pub struct SchedulerListener {
    store: Arc<dyn DocumentStore>,
    wake: Arc<Notify>,
}

impl SchedulerListener {
    pub fn new(store: Arc<dyn DocumentStore>, wake: Arc<Notify>) -> Self {
        Self { store, wake }
    }

    pub async fn apply(&self, cmd: SchedulerCommand) -> Result<CommandOutcome, TributaryError> {
        match cmd {
            SchedulerCommand::Schedule {
                timestamp,
                exchange,
                routing_key,
                message,
                message_id,
                delivery_mode,
                mandatory,
                priority,
            } => {
                let options = match delivery_options(exchange, &routing_key, delivery_mode, mandatory, priority) {
                    Ok(options) => options,
                    Err(e) => {
                        warn!(error = %e, "ignoring ill-formed schedule request");
                        return Ok(CommandOutcome::Ignored);
                    }
                };
                self.schedule(timestamp, options, message, message_id.as_deref()).await
            }
            SchedulerCommand::Cancel { message_id } => match message_id {
                Some(mid) => self.cancel(&mid).await,
                None => {
                    warn!("ignoring cancel with no message_id");
                    Ok(CommandOutcome::Ignored)
                }
            },
            SchedulerCommand::Noop => Ok(CommandOutcome::Noop),
        }
    }

    async fn schedule(
        &self,
        timestamp: DateTime<Utc>,
        options: DeliveryOptions,
        message: Value,
        message_id: Option<&str>,
    ) -> Result<CommandOutcome, TributaryError> {
        let store = self.store.as_ref();
        let existing = match message_id {
            Some(mid) => DeferredMessage::lookup_by_message_id(store, mid).await?,
            None => None,
        };
        let mut deferred = match existing {
            Some(existing) if existing.claimed => {
                warn!(id = %existing.id(), "ignoring update to in-progress message, too late");
                return Ok(CommandOutcome::Ignored);
            }
            Some(mut existing) => {
                existing.timestamp = timestamp;
                existing.options = options;
                existing.message = message;
                existing
            }
            None => DeferredMessage::new(message_id, timestamp, options, message),
        };

        match deferred.save(store).await {
            Ok(()) => {
                info!(id = %deferred.id(), at = %deferred.timestamp, "scheduled message");
                Ok(CommandOutcome::Scheduled {
                    id: deferred.id().to_string(),
                })
            }
            Err(e) if e.is_conflict() => {
                warn!(id = %deferred.id(), "conflict storing deferred message, keeping the stored copy");
                Ok(CommandOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }

    async fn cancel(&self, message_id: &str) -> Result<CommandOutcome, TributaryError> {
        let store = self.store.as_ref();
        let Some(mut deferred) = DeferredMessage::lookup_by_message_id(store, message_id).await? else {
            warn!(message_id, "ignoring cancel for missing message, already sent?");
            return Ok(CommandOutcome::Ignored);
        };
        // Claiming first keeps the dispatcher from starting it.
        if !deferred.claim(store).await? {
            warn!(message_id, "ignoring cancel for in-progress message");
            return Ok(CommandOutcome::Ignored);
        }
        match deferred.delete(store).await {
            Ok(()) => {
                info!(id = %deferred.id(), "cancelled deferred message");
                Ok(CommandOutcome::Cancelled {
                    id: deferred.id().to_string(),
                })
            }
            Err(TributaryError::NotFound { .. }) => {
                warn!(message_id, "deferred message vanished before cancel");
                Ok(CommandOutcome::Ignored)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageHandler for SchedulerListener {
    async fn handle(&self, message: Value) -> Result<(), TributaryError> {
        let outcome = match SchedulerCommand::from_value(message) {
            Ok(cmd) => self.apply(cmd).await,
            Err(e) => {
                warn!(error = %e, "ignoring malformed scheduler command");
                Ok(CommandOutcome::Ignored)
            }
        };
        self.wake.notify_one();
        debug!(?outcome, "scheduler command handled");
        outcome.map(|_| ())
    }
}
