// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work-queue broker contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TributaryError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Delivery, PublishOptions};

/// Routes messages by type to bound queues, each consumed competitively.
///
/// A message published under a message type is copied into every queue bound
/// to that type; within a queue each message is handed to exactly one
/// receiver and stays unacknowledged until [`ack`](MessageBroker::ack).
#[async_trait]
pub trait MessageBroker: PluginAdapter {
    /// Create `queue` if needed and bind it to `message_type`.
    async fn declare(&self, message_type: &str, queue: &str) -> Result<(), TributaryError>;

    /// Publish a message; returns the number of queues it was routed to.
    async fn publish(
        &self,
        message_type: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> Result<usize, TributaryError>;

    /// Wait for the next message on `queue`.
    ///
    /// Cancel safe: dropping the returned future never strands a message. One
    /// already taken from the queue by the abandoned call is put back.
    async fn receive(&self, queue: &str) -> Result<Delivery, TributaryError>;

    /// Acknowledge a delivery so it is never handed out again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TributaryError>;

    /// Put an unacknowledged delivery back at the head of its priority class,
    /// as if it had never been handed out.
    async fn release(&self, delivery: &Delivery) -> Result<(), TributaryError>;

    /// Drop every waiting message in `queue`; returns how many were removed.
    async fn purge(&self, queue: &str) -> Result<usize, TributaryError>;

    /// Remove `queue`, its bindings, and its messages.
    async fn delete_queue(&self, queue: &str) -> Result<(), TributaryError>;

    /// Number of messages waiting or unacknowledged in `queue`.
    async fn pending(&self, queue: &str) -> Result<usize, TributaryError>;
}
