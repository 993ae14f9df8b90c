// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Broadcast event bus keyed by channel name.
//!
//! Every listener registered on a channel receives every event sent to it
//! afterwards. There is no persistence: events sent before a listener was
//! added are never seen by it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use tributary_core::TributaryError;

/// Identifies a registered listener for [`EventBus::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

struct Listener {
    channel: String,
    task: JoinHandle<()>,
}

/// Channel-addressed broadcast of JSON events.
pub struct EventBus {
    capacity: usize,
    channels: DashMap<String, broadcast::Sender<Value>>,
    listeners: DashMap<u64, Listener>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus whose channels buffer `capacity` events per listener.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: DashMap::new(),
            listeners: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Send `payload` to every current listener on `channel`.
    ///
    /// Returns how many receivers the event reached; zero is not an error.
    pub fn send(&self, channel: &str, payload: Value) -> usize {
        let Some(sender) = self.channels.get(channel).map(|s| s.clone()) else {
            debug!(channel, "event sent to channel with no listeners");
            return 0;
        };
        let reached = sender.send(payload).unwrap_or(0);
        debug!(channel, reached, "event sent");
        reached
    }

    /// Raw receiver for `channel`.
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Value> {
        self.sender(channel).subscribe()
    }

    /// Run `callback` for every event on `channel` until removed.
    ///
    /// Callback errors are logged and the listener keeps running.
    pub fn add_listener<F, Fut>(&self, channel: &str, callback: F) -> ListenerHandle
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TributaryError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rx = self.subscribe(channel);
        let name = channel.to_string();
        let callback = Arc::new(callback);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Err(e) = callback(event).await {
                            error!(channel = %name, error = %e, "event listener failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "event listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.listeners.insert(
            id,
            Listener {
                channel: channel.to_string(),
                task,
            },
        );
        ListenerHandle(id)
    }

    /// Detach a listener. Returns false if it was already gone.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        match self.listeners.remove(&handle.0) {
            Some((_, listener)) => {
                listener.task.abort();
                debug!(channel = %listener.channel, "event listener removed");
                true
            }
            None => false,
        }
    }

    /// Number of listeners registered on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners
            .iter()
            .filter(|l| l.value().channel == channel)
            .count()
    }

    /// Detach every listener and drop every channel.
    pub fn kill(&self) {
        for entry in self.listeners.iter() {
            entry.value().task.abort();
        }
        self.listeners.clear();
        self.channels.clear();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        for entry in self.listeners.iter() {
            entry.value().task.abort();
        }
    }
}
