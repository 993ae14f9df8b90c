// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions.
//!
//! Backends extend the [`PluginAdapter`] base trait and use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod broker;
pub mod indexer;
pub mod store;

pub use adapter::PluginAdapter;
pub use broker::MessageBroker;
pub use indexer::FeedIndexer;
pub use store::DocumentStore;
