// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process work-queue broker.
//!
//! Messages live only as long as the process. Within a queue, higher
//! priorities are delivered first and equal priorities in publish order.

use std::collections::{BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use tributary_core::types::MAX_PRIORITY;
use tributary_core::{
    AdapterType, Delivery, HealthStatus, MessageBroker, PluginAdapter, PublishOptions,
    TributaryError,
};

struct Queued {
    priority: u8,
    tag: i64,
    payload: Value,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Queued>,
    unacked: HashMap<i64, Queued>,
}

impl QueueState {
    /// Insert behind every message of equal or higher priority.
    fn push(&mut self, message: Queued) {
        let at = self
            .ready
            .iter()
            .position(|m| m.priority < message.priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(at, message);
    }

    /// Insert ahead of every message of equal or lower priority.
    fn requeue(&mut self, message: Queued) {
        let at = self
            .ready
            .iter()
            .position(|m| m.priority <= message.priority)
            .unwrap_or(self.ready.len());
        self.ready.insert(at, message);
    }
}

#[derive(Default)]
struct Inner {
    bindings: HashMap<String, BTreeSet<String>>,
    queues: HashMap<String, QueueState>,
    next_tag: i64,
}

/// [`MessageBroker`] over in-memory queues.
#[derive(Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages delivered but not yet acknowledged in `queue`.
    pub async fn unacked(&self, queue: &str) -> usize {
        let inner = self.inner.lock().await;
        inner.queues.get(queue).map_or(0, |q| q.unacked.len())
    }
}

#[async_trait]
impl PluginAdapter for MemoryBroker {
    fn name(&self) -> &str {
        "memory-broker"
    }

    fn version(&self) -> semver::Version {
        semver::Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(semver::Version::new(0, 1, 0))
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Broker
    }

    async fn health_check(&self) -> Result<HealthStatus, TributaryError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), TributaryError> {
        self.notify.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare(&self, message_type: &str, queue: &str) -> Result<(), TributaryError> {
        let mut inner = self.inner.lock().await;
        inner
            .bindings
            .entry(message_type.to_string())
            .or_default()
            .insert(queue.to_string());
        inner.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(
        &self,
        message_type: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> Result<usize, TributaryError> {
        let mut inner = self.inner.lock().await;
        let targets: Vec<String> = inner
            .bindings
            .get(message_type)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default();

        if targets.is_empty() {
            if options.mandatory {
                return Err(TributaryError::Unroutable {
                    message_type: message_type.to_string(),
                });
            }
            debug!(message_type, "published message matched no queue");
            return Ok(0);
        }

        for queue in &targets {
            inner.next_tag += 1;
            let tag = inner.next_tag;
            inner.queues.entry(queue.clone()).or_default().push(Queued {
                priority: options.priority.min(MAX_PRIORITY),
                tag,
                payload: payload.clone(),
            });
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(targets.len())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery, TributaryError> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                let state = inner.queues.entry(queue.to_string()).or_default();
                if let Some(message) = state.ready.pop_front() {
                    let delivery = Delivery {
                        queue: queue.to_string(),
                        tag: message.tag,
                        payload: message.payload.clone(),
                        redelivered: false,
                    };
                    state.unacked.insert(message.tag, message);
                    return Ok(delivery);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TributaryError> {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.queues.get_mut(&delivery.queue) {
            state.unacked.remove(&delivery.tag);
        }
        Ok(())
    }

    async fn release(&self, delivery: &Delivery) -> Result<(), TributaryError> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(&delivery.queue) else {
            return Ok(());
        };
        if let Some(message) = state.unacked.remove(&delivery.tag) {
            state.requeue(message);
            drop(inner);
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn purge(&self, queue: &str) -> Result<usize, TributaryError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.queues.get_mut(queue).map_or(0, |state| {
            let purged = state.ready.len();
            state.ready.clear();
            purged
        }))
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), TributaryError> {
        let mut inner = self.inner.lock().await;
        inner.queues.remove(queue);
        for queues in inner.bindings.values_mut() {
            queues.remove(queue);
        }
        inner.bindings.retain(|_, queues| !queues.is_empty());
        Ok(())
    }

    async fn pending(&self, queue: &str) -> Result<usize, TributaryError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(queue)
            .map_or(0, |state| state.ready.len() + state.unacked.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_by_priority_then_order() {
        let broker = MemoryBroker::new();
        broker.declare("job", "jobs").await.unwrap();
        let urgent = PublishOptions {
            priority: 5,
            ..PublishOptions::default()
        };
        broker.publish("job", &json!("a"), &PublishOptions::default()).await.unwrap();
        broker.publish("job", &json!("b"), &urgent).await.unwrap();
        broker.publish("job", &json!("c"), &PublishOptions::default()).await.unwrap();
        broker.publish("job", &json!("d"), &urgent).await.unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(broker.receive("jobs").await.unwrap().payload);
        }
        assert_eq!(order, vec![json!("b"), json!("d"), json!("a"), json!("c")]);
    }

    #[tokio::test]
    async fn unacked_until_ack() {
        let broker = MemoryBroker::new();
        broker.declare("job", "jobs").await.unwrap();
        broker.publish("job", &json!(1), &PublishOptions::default()).await.unwrap();

        let delivery = broker.receive("jobs").await.unwrap();
        assert_eq!(broker.unacked("jobs").await, 1);
        assert_eq!(broker.pending("jobs").await.unwrap(), 1);
        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.pending("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn released_delivery_returns_ahead_of_its_peers() {
        let broker = MemoryBroker::new();
        broker.declare("job", "jobs").await.unwrap();
        let urgent = PublishOptions {
            priority: 5,
            ..PublishOptions::default()
        };
        broker.publish("job", &json!("a"), &PublishOptions::default()).await.unwrap();
        broker.publish("job", &json!("b"), &PublishOptions::default()).await.unwrap();

        let first = broker.receive("jobs").await.unwrap();
        assert_eq!(first.payload, json!("a"));
        broker.publish("job", &json!("u"), &urgent).await.unwrap();
        broker.release(&first).await.unwrap();
        assert_eq!(broker.unacked("jobs").await, 0);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(broker.receive("jobs").await.unwrap().payload);
        }
        assert_eq!(order, vec![json!("u"), json!("a"), json!("b")]);

        // Releasing after ack is a no-op.
        broker.ack(&first).await.unwrap();
        broker.release(&first).await.unwrap();
        assert_eq!(broker.unacked("jobs").await, 2);
        assert_eq!(broker.pending("jobs").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn each_message_goes_to_one_receiver() {
        let broker = Arc::new(MemoryBroker::new());
        broker.declare("job", "jobs").await.unwrap();
        let a = tokio::spawn({
            let broker = broker.clone();
            async move { broker.receive("jobs").await }
        });
        let b = tokio::spawn({
            let broker = broker.clone();
            async move { broker.receive("jobs").await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("job", &json!(1), &PublishOptions::default()).await.unwrap();
        broker.publish("job", &json!(2), &PublishOptions::default()).await.unwrap();

        let mut got = vec![
            a.await.unwrap().unwrap().payload,
            b.await.unwrap().unwrap().payload,
        ];
        got.sort_by_key(|v| v.as_i64());
        assert_eq!(got, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn mandatory_without_binding_fails() {
        let broker = MemoryBroker::new();
        let mandatory = PublishOptions {
            mandatory: true,
            ..PublishOptions::default()
        };
        assert!(matches!(
            broker.publish("none", &json!({}), &mandatory).await,
            Err(TributaryError::Unroutable { .. })
        ));
    }

    #[tokio::test]
    async fn purge_and_delete() {
        let broker = MemoryBroker::new();
        broker.declare("job", "jobs").await.unwrap();
        broker.publish("job", &json!(1), &PublishOptions::default()).await.unwrap();
        broker.publish("job", &json!(2), &PublishOptions::default()).await.unwrap();
        assert_eq!(broker.purge("jobs").await.unwrap(), 2);

        broker.delete_queue("jobs").await.unwrap();
        assert_eq!(
            broker.publish("job", &json!(3), &PublishOptions::default()).await.unwrap(),
            0
        );
    }
}
