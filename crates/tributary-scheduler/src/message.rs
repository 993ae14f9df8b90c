// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The stored form of a deferred message and its claim protocol.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use tributary_core::{Document, DocumentStore, PublishOptions, TributaryError};

/// Document type tag of a deferred message.
pub const DEFERRED_TYPE: &str = "DeferredMessage";

/// Where a deferred message is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Exchange {
    /// A work queue, addressed by message type.
    #[default]
    #[serde(rename = "work_dispatch")]
    WorkDispatch,
    /// An [`EventBus`](tributary_bus::EventBus) channel.
    #[serde(rename = "eventbus")]
    EventBus,
}

/// Routing recorded with a deferred message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOptions {
    #[serde(default)]
    pub exchange: Exchange,
    /// Message type or channel name.
    pub routing_key: String,
    /// 1 is transient, 2 is persistent.
    #[serde(default = "default_delivery_mode")]
    pub delivery_mode: u8,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub priority: u8,
}

fn default_delivery_mode() -> u8 {
    2
}

impl DeliveryOptions {
    pub fn work(routing_key: impl Into<String>) -> Self {
        Self {
            exchange: Exchange::WorkDispatch,
            routing_key: routing_key.into(),
            delivery_mode: default_delivery_mode(),
            mandatory: false,
            priority: 0,
        }
    }

    pub fn event(channel: impl Into<String>) -> Self {
        Self {
            exchange: Exchange::EventBus,
            ..Self::work(channel)
        }
    }

    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            persistent: self.delivery_mode == 2,
            mandatory: self.mandatory,
            priority: self.priority,
        }
    }
}

/// A durably stored instruction to emit `message` at `timestamp`.
///
/// While `claimed`, `timestamp` holds the claim time instead of the send
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredMessage {
    #[serde(skip)]
    id: String,
    #[serde(skip)]
    rev: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub options: DeliveryOptions,
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub claimed: bool,
    #[serde(default)]
    pub error_count: u32,
}

impl DeferredMessage {
    /// Document id for a caller-supplied message id.
    pub fn id_for_message_id(message_id: &str) -> String {
        format!("{DEFERRED_TYPE}:{message_id}")
    }

    /// A new message; anonymous messages get a random id.
    pub fn new(
        message_id: Option<&str>,
        timestamp: DateTime<Utc>,
        options: DeliveryOptions,
        message: Value,
    ) -> Self {
        let id = match message_id {
            Some(mid) => Self::id_for_message_id(mid),
            None => uuid::Uuid::new_v4().to_string(),
        };
        Self {
            id,
            rev: None,
            message_id: message_id.map(str::to_string),
            timestamp,
            options,
            message,
            claimed: false,
            error_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn rev(&self) -> Option<u64> {
        self.rev
    }

    pub fn from_document(doc: &Document) -> Result<Self, TributaryError> {
        let mut msg: Self = serde_json::from_value(doc.body.clone())?;
        msg.id = doc.id.clone();
        msg.rev = Some(doc.rev);
        Ok(msg)
    }

    pub async fn get(store: &dyn DocumentStore, id: &str) -> Result<Option<Self>, TributaryError> {
        match store.get(id).await? {
            Some(doc) if is_deferred(&doc.body) => Ok(Some(Self::from_document(&doc)?)),
            _ => Ok(None),
        }
    }

    pub async fn lookup_by_message_id(
        store: &dyn DocumentStore,
        message_id: &str,
    ) -> Result<Option<Self>, TributaryError> {
        Self::get(store, &Self::id_for_message_id(message_id)).await
    }

    pub fn to_body(&self) -> Result<Value, TributaryError> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut body {
            map.insert("document_types".into(), json!([DEFERRED_TYPE]));
        }
        Ok(body)
    }

    /// Write at the revision this copy was read at.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), TributaryError> {
        let rev = store.put(&self.id, self.rev, self.to_body()?).await?;
        self.rev = Some(rev);
        Ok(())
    }

    /// Take the exclusive right to send this message.
    ///
    /// Returns false if it is already claimed or another writer got there
    /// first.
    pub async fn claim(&mut self, store: &dyn DocumentStore) -> Result<bool, TributaryError> {
        if self.claimed {
            return Ok(false);
        }
        let previous = (self.timestamp, self.claimed);
        self.timestamp = Utc::now();
        self.claimed = true;
        match self.save(store).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_conflict() => {
                debug!(id = %self.id, "claim lost to another writer");
                (self.timestamp, self.claimed) = previous;
                Ok(false)
            }
            Err(e) => {
                (self.timestamp, self.claimed) = previous;
                Err(e)
            }
        }
    }

    /// Release a claim, optionally moving the send time.
    pub async fn unclaim(
        &mut self,
        store: &dyn DocumentStore,
        reschedule_at: Option<DateTime<Utc>>,
    ) -> Result<(), TributaryError> {
        self.claimed = false;
        if let Some(at) = reschedule_at {
            self.timestamp = at;
        }
        self.save(store).await
    }

    pub async fn delete(&self, store: &dyn DocumentStore) -> Result<(), TributaryError> {
        let rev = self
            .rev
            .ok_or_else(|| TributaryError::NotFound { id: self.id.clone() })?;
        store.delete(&self.id, rev).await
    }
}

/// True if a stored body is a deferred message.
pub fn is_deferred(body: &Value) -> bool {
    body.get("document_types")
        .and_then(Value::as_array)
        .is_some_and(|types| types.iter().any(|t| t == DEFERRED_TYPE))
}
