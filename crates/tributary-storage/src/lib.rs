// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Tributary aggregator.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, the versioned document store with
//! maintained indexes, and a durable work-queue broker.

pub mod broker;
pub mod database;
pub mod migrations;
pub mod store;

pub use broker::SqliteBroker;
pub use database::Database;
pub use store::SqliteDocumentStore;
