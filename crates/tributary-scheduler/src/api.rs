// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client side of the scheduler: publishes commands to its queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::debug;
use tributary_bus::MessageDispatch;
use tributary_core::{FeedIndexer, PublishOptions, TributaryError};

use crate::commands::{MESSAGE_SCHEDULER, SchedulerCommand};
use crate::message::DeliveryOptions;

/// Message type the external fetch subsystem consumes.
pub const INDEX_FEED: &str = "index_feed";

/// Delivery options for [`SchedulerClient::defer_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferOptions {
    /// Idempotency key; rescheduling with the same id replaces the message.
    pub message_id: Option<String>,
    pub persistent: bool,
    pub mandatory: bool,
    pub priority: u8,
}

impl Default for DeferOptions {
    fn default() -> Self {
        Self {
            message_id: None,
            persistent: true,
            mandatory: false,
            priority: 0,
        }
    }
}

impl DeferOptions {
    pub fn with_id(message_id: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct SchedulerClient {
    dispatch: MessageDispatch,
}

impl SchedulerClient {
    pub fn new(dispatch: MessageDispatch) -> Self {
        Self { dispatch }
    }

    async fn send(&self, cmd: &SchedulerCommand) -> Result<(), TributaryError> {
        let payload = serde_json::to_value(cmd)?;
        let options = PublishOptions {
            mandatory: true,
            ..PublishOptions::default()
        };
        self.dispatch
            .send_with(MESSAGE_SCHEDULER, &payload, &options)
            .await?;
        Ok(())
    }

    /// Deliver `message` to the `message_type` work queue at `at`.
    pub async fn defer_message(
        &self,
        at: DateTime<Utc>,
        message: &Value,
        message_type: &str,
        options: &DeferOptions,
    ) -> Result<(), TributaryError> {
        let mut delivery = DeliveryOptions::work(message_type);
        delivery.delivery_mode = if options.persistent { 2 } else { 1 };
        delivery.mandatory = options.mandatory;
        delivery.priority = options.priority;
        let cmd = SchedulerCommand::schedule(at, &delivery, message.clone(), options.message_id.as_deref());
        self.send(&cmd).await?;
        debug!(message_type, at = %at, "message deferred");
        Ok(())
    }

    /// Broadcast `payload` on an event bus `channel` at `at`.
    pub async fn defer_event(
        &self,
        at: DateTime<Utc>,
        channel: &str,
        payload: &Value,
        message_id: Option<&str>,
    ) -> Result<(), TributaryError> {
        let cmd = SchedulerCommand::schedule(at, &DeliveryOptions::event(channel), payload.clone(), message_id);
        self.send(&cmd).await?;
        debug!(channel, at = %at, "event deferred");
        Ok(())
    }

    pub async fn cancel_deferred(&self, message_id: &str) -> Result<(), TributaryError> {
        self.send(&SchedulerCommand::Cancel {
            message_id: Some(message_id.to_string()),
        })
        .await
    }

    /// Wake the dispatcher.
    pub async fn noop(&self) -> Result<(), TributaryError> {
        self.send(&SchedulerCommand::Noop).await
    }
}

/// Triggers feed fetches through the `index_feed` work queue.
#[derive(Clone)]
pub struct DispatchFeedIndexer {
    dispatch: MessageDispatch,
    scheduler: SchedulerClient,
}

impl DispatchFeedIndexer {
    pub fn new(dispatch: MessageDispatch) -> Self {
        Self {
            scheduler: SchedulerClient::new(dispatch.clone()),
            dispatch,
        }
    }
}

#[async_trait]
impl FeedIndexer for DispatchFeedIndexer {
    async fn request_feed_index(&self, url: &str) -> Result<(), TributaryError> {
        let options = PublishOptions {
            mandatory: true,
            ..PublishOptions::default()
        };
        self.dispatch
            .send_with(INDEX_FEED, &json!({ "url": url }), &options)
            .await?;
        debug!(url, "feed index requested");
        Ok(())
    }

    async fn schedule_feed_index(&self, url: &str, at: DateTime<Utc>) -> Result<(), TributaryError> {
        let options = DeferOptions {
            mandatory: true,
            ..DeferOptions::default()
        };
        self.scheduler
            .defer_message(at, &json!({ "url": url }), INDEX_FEED, &options)
            .await
    }
}
