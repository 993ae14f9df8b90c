// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message plumbing for the Tributary aggregator.
//!
//! Two delivery styles live here:
//!
//! - **Work queues** ([`MessageDispatch`]): each message goes to exactly one
//!   consumer of a queue and is always acknowledged after its handler runs,
//!   whether the handler succeeded, failed, or panicked.
//! - **Broadcast** ([`EventBus`]): every listener on a channel sees every
//!   event sent while it is registered; nothing is persisted.

pub mod dispatch;
pub mod eventbus;
pub mod memory;

pub use dispatch::{Acknowledger, FnHandler, MessageDispatch, MessageHandler, WorkerHandle};
pub use eventbus::{EventBus, ListenerHandle};
pub use memory::MemoryBroker;
