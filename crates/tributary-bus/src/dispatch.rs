// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Work-queue dispatch over a [`MessageBroker`].
//!
//! Producers call [`MessageDispatch::send`] with a message type; consumers
//! call [`MessageDispatch::start_worker`] with a [`MessageHandler`]. Each
//! worker runs a bounded pool of handler tasks and acknowledges every
//! delivery once its handler returns, errors or panics, unless the handler
//! already acknowledged it through its [`Acknowledger`]. Failed messages are
//! never redelivered by this layer.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tributary_core::{Delivery, MessageBroker, PublishOptions, TributaryError};
use tributary_resilience::ExponentialBackoff;

/// Prefix of the default queue for a message type.
pub const WORK_DISPATCH_PREFIX: &str = "work_dispatch";

const DEFAULT_CONCURRENCY: usize = 8;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Consumer callback for one work message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Value) -> Result<(), TributaryError>;

    /// Like [`handle`](Self::handle), with the delivery's acknowledger at hand.
    ///
    /// Override this to ack before slow follow-up work finishes. The worker
    /// skips its own ack when the handler already sent one.
    async fn handle_delivery(
        &self,
        message: Value,
        _ack: &Acknowledger,
    ) -> Result<(), TributaryError> {
        self.handle(message).await
    }
}

/// Acknowledges one delivery at most once.
pub struct Acknowledger {
    broker: Arc<dyn MessageBroker>,
    delivery: Delivery,
    acked: AtomicBool,
}

impl Acknowledger {
    fn new(broker: Arc<dyn MessageBroker>, delivery: Delivery) -> Self {
        Self {
            broker,
            delivery,
            acked: AtomicBool::new(false),
        }
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    /// Ack the delivery now. Later calls are no-ops once one succeeded.
    pub async fn ack(&self) -> Result<(), TributaryError> {
        if self.is_acked() {
            return Ok(());
        }
        self.broker.ack(&self.delivery).await?;
        self.acked.store(true, Ordering::Release);
        Ok(())
    }
}

/// Adapts an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), TributaryError>> + Send,
{
    async fn handle(&self, message: Value) -> Result<(), TributaryError> {
        (self.0)(message).await
    }
}

/// Publishes work messages and runs consumers for them.
#[derive(Clone)]
pub struct MessageDispatch {
    broker: Arc<dyn MessageBroker>,
    concurrency: usize,
    drain_timeout: Duration,
}

impl MessageDispatch {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            concurrency: DEFAULT_CONCURRENCY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Maximum handlers in flight per worker.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// How long a stopping worker waits for in-flight handlers.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn broker(&self) -> &Arc<dyn MessageBroker> {
        &self.broker
    }

    /// Default queue name for `message_type`.
    pub fn queue_id_for(message_type: &str) -> String {
        format!("{WORK_DISPATCH_PREFIX}.{message_type}")
    }

    /// Bind `queue` (or the default queue) to `message_type`.
    ///
    /// Returns the queue name.
    pub async fn declare(
        &self,
        message_type: &str,
        queue: Option<&str>,
    ) -> Result<String, TributaryError> {
        let queue = queue
            .map(str::to_string)
            .unwrap_or_else(|| Self::queue_id_for(message_type));
        self.broker.declare(message_type, &queue).await?;
        debug!(message_type, queue = %queue, "queue declared");
        Ok(queue)
    }

    /// Drop the backlog of `queue`.
    pub async fn clear(&self, queue: &str) -> Result<usize, TributaryError> {
        let purged = self.broker.purge(queue).await?;
        if purged > 0 {
            info!(queue, purged, "queue purged");
        }
        Ok(purged)
    }

    /// Publish `message` with default (persistent, non-mandatory) options.
    pub async fn send<T: Serialize + ?Sized>(
        &self,
        message_type: &str,
        message: &T,
    ) -> Result<usize, TributaryError> {
        let payload = serde_json::to_value(message)?;
        self.send_with(message_type, &payload, &PublishOptions::default())
            .await
    }

    pub async fn send_with(
        &self,
        message_type: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> Result<usize, TributaryError> {
        self.broker.publish(message_type, payload, options).await
    }

    /// Declare the queue for `message_type` and start consuming it.
    ///
    /// The worker stops when `cancel` fires, then waits up to the drain
    /// timeout for in-flight handlers.
    pub async fn start_worker(
        &self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
        queue: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<WorkerHandle, TributaryError> {
        let queue = self.declare(message_type, queue).await?;
        let worker = Worker {
            broker: self.broker.clone(),
            handler,
            queue: queue.clone(),
            concurrency: self.concurrency,
            drain_timeout: self.drain_timeout,
        };
        let join = tokio::spawn(worker.run(cancel));
        info!(message_type, queue = %queue, "worker started");
        Ok(WorkerHandle { queue, join })
    }
}

/// A running consumer.
pub struct WorkerHandle {
    queue: String,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the worker to stop after its token was cancelled.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(queue = %self.queue, error = %e, "worker task failed");
        }
    }
}

struct Worker {
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn MessageHandler>,
    queue: String,
    concurrency: usize,
    drain_timeout: Duration,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut backoff = ExponentialBackoff::default();

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    error!(queue = %self.queue, error = %e, "handler task failed");
                }
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Cancellation wins ties; brokers put back anything a dropped
            // receive had already claimed.
            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.broker.receive(&self.queue) => received,
            };

            match received {
                Ok(delivery) => {
                    backoff.reset();
                    let broker = self.broker.clone();
                    let handler = self.handler.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        handle_and_ack(broker, handler, delivery).await;
                    });
                }
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "receive failed, reconnecting");
                    if !backoff.sleep(&cancel).await {
                        break;
                    }
                }
            }
        }

        debug!(queue = %self.queue, in_flight = tasks.len(), "worker stopping");
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(finished) = tasks.join_next().await {
                if let Err(e) = finished {
                    error!(queue = %self.queue, error = %e, "handler task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                queue = %self.queue,
                remaining = tasks.len(),
                "drain timeout reached, aborting in-flight handlers"
            );
            tasks.abort_all();
        }
        info!(queue = %self.queue, "worker stopped");
    }
}

/// Run the handler, then acknowledge regardless of how it ended unless the
/// handler acknowledged on its own.
async fn handle_and_ack(
    broker: Arc<dyn MessageBroker>,
    handler: Arc<dyn MessageHandler>,
    delivery: Delivery,
) {
    let payload = delivery.payload.clone();
    let acker = Acknowledger::new(broker, delivery);
    let outcome = AssertUnwindSafe(handler.handle_delivery(payload, &acker))
        .catch_unwind()
        .await;
    let delivery = acker.delivery();
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(queue = %delivery.queue, tag = delivery.tag, error = %e, "message handler failed");
        }
        Err(_) => {
            error!(queue = %delivery.queue, tag = delivery.tag, "message handler panicked");
        }
    }
    if let Err(e) = acker.ack().await {
        warn!(queue = %delivery.queue, tag = delivery.tag, error = %e, "ack failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBroker;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn dispatch() -> (MessageDispatch, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        (MessageDispatch::new(broker.clone()), broker)
    }

    #[test]
    fn default_queue_name() {
        assert_eq!(
            MessageDispatch::queue_id_for("index_feed"),
            "work_dispatch.index_feed"
        );
    }

    #[tokio::test]
    async fn worker_receives_sent_messages() {
        let (dispatch, _broker) = dispatch();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handler = Arc::new(FnHandler(move |msg: Value| {
            let tx = tx.clone();
            async move {
                tx.send(msg).ok();
                Ok(())
            }
        }));
        let worker = dispatch
            .start_worker("greet", handler, None, cancel.clone())
            .await
            .unwrap();
        assert_eq!(worker.queue(), "work_dispatch.greet");

        dispatch.send("greet", &json!({"hi": 1})).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got["hi"], 1);

        cancel.cancel();
        worker.join().await;
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_still_ack() {
        let (dispatch, broker) = dispatch();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = Arc::new(FnHandler(move |msg: Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if msg == json!("panic") {
                    panic!("handler blew up");
                }
                Err(TributaryError::Internal("nope".into()))
            }
        }));
        let cancel = CancellationToken::new();
        let worker = dispatch
            .start_worker("job", handler, Some("jobs"), cancel.clone())
            .await
            .unwrap();

        dispatch.send("job", &json!("fail")).await.unwrap();
        dispatch.send("job", &json!("panic")).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = calls.load(Ordering::SeqCst) == 2
                    && broker.pending("jobs").await.unwrap() == 0;
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both messages should be handled and acked");

        cancel.cancel();
        worker.join().await;
    }

    /// Delegates to a [`MemoryBroker`] and counts acks.
    struct CountingBroker {
        inner: MemoryBroker,
        acks: AtomicUsize,
    }

    #[async_trait]
    impl tributary_core::PluginAdapter for CountingBroker {
        fn name(&self) -> &str {
            "counting"
        }

        fn version(&self) -> semver::Version {
            semver::Version::new(0, 1, 0)
        }

        fn adapter_type(&self) -> tributary_core::AdapterType {
            tributary_core::AdapterType::Broker
        }

        async fn health_check(&self) -> Result<tributary_core::HealthStatus, TributaryError> {
            Ok(tributary_core::HealthStatus::Healthy)
        }

        async fn shutdown(&self) -> Result<(), TributaryError> {
            Ok(())
        }
    }

    #[async_trait]
    impl MessageBroker for CountingBroker {
        async fn declare(&self, message_type: &str, queue: &str) -> Result<(), TributaryError> {
            self.inner.declare(message_type, queue).await
        }

        async fn publish(
            &self,
            message_type: &str,
            payload: &Value,
            options: &PublishOptions,
        ) -> Result<usize, TributaryError> {
            self.inner.publish(message_type, payload, options).await
        }

        async fn receive(&self, queue: &str) -> Result<Delivery, TributaryError> {
            self.inner.receive(queue).await
        }

        async fn ack(&self, delivery: &Delivery) -> Result<(), TributaryError> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            self.inner.ack(delivery).await
        }

        async fn release(&self, delivery: &Delivery) -> Result<(), TributaryError> {
            self.inner.release(delivery).await
        }

        async fn purge(&self, queue: &str) -> Result<usize, TributaryError> {
            self.inner.purge(queue).await
        }

        async fn delete_queue(&self, queue: &str) -> Result<(), TributaryError> {
            self.inner.delete_queue(queue).await
        }

        async fn pending(&self, queue: &str) -> Result<usize, TributaryError> {
            self.inner.pending(queue).await
        }
    }

    /// Acks up front, then fails the rest of its work.
    struct EarlyAck {
        done: mpsc::UnboundedSender<bool>,
    }

    #[async_trait]
    impl MessageHandler for EarlyAck {
        async fn handle(&self, _message: Value) -> Result<(), TributaryError> {
            unreachable!("worker calls handle_delivery")
        }

        async fn handle_delivery(
            &self,
            _message: Value,
            ack: &Acknowledger,
        ) -> Result<(), TributaryError> {
            ack.ack().await?;
            ack.ack().await?;
            self.done.send(ack.is_acked()).ok();
            Err(TributaryError::Internal("follow-up work failed".into()))
        }
    }

    #[tokio::test]
    async fn handler_ack_is_not_repeated_by_worker() {
        let broker = Arc::new(CountingBroker {
            inner: MemoryBroker::new(),
            acks: AtomicUsize::new(0),
        });
        let dispatch = MessageDispatch::new(broker.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = dispatch
            .start_worker("job", Arc::new(EarlyAck { done: tx }), Some("jobs"), cancel.clone())
            .await
            .unwrap();

        dispatch.send("job", &json!("work")).await.unwrap();
        let acked = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(acked);

        // Let the worker finish the failed handler before counting.
        cancel.cancel();
        worker.join().await;
        assert_eq!(broker.acks.load(Ordering::SeqCst), 1);
        assert_eq!(broker.pending("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_interrupts_idle_receive() {
        let (dispatch, _broker) = dispatch();
        let cancel = CancellationToken::new();
        let handler = Arc::new(FnHandler(|_msg: Value| async { Ok(()) }));
        let worker = dispatch
            .start_worker("idle", handler, None, cancel.clone())
            .await
            .unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker.join())
            .await
            .expect("worker should stop promptly");
    }

    #[tokio::test]
    async fn clear_purges_backlog() {
        let (dispatch, _broker) = dispatch();
        let queue = dispatch.declare("job", None).await.unwrap();
        dispatch.send("job", &json!(1)).await.unwrap();
        dispatch.send("job", &json!(2)).await.unwrap();
        assert_eq!(dispatch.clear(&queue).await.unwrap(), 2);
    }
}
