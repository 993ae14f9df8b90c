// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Tributary aggregator.
//!
//! This crate provides the error type, the document and index types, and the
//! backend traits (document store, message broker, feed indexer) that every
//! other Tributary crate builds on.

pub mod cursor;
pub mod document;
pub mod error;
pub mod keys;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use cursor::RangeCursor;
pub use document::{
    Document, DocumentWrite, IndexDefinition, IndexRow, RangeQuery, WriteOutcome, WriteStatus,
};
pub use error::TributaryError;
pub use keys::KeyRange;
pub use types::{AdapterType, Delivery, HealthStatus, PublishOptions};

pub use traits::{DocumentStore, FeedIndexer, MessageBroker, PluginAdapter};
