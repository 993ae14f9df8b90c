// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tributary integration tests.
//!
//! Provides a throwaway store and broker plus fakes for the external
//! collaborators, so cross-crate flows run fast and deterministically.
//!
//! # Components
//!
//! - [`TestHarness`] - temp SQLite store with every index, memory broker, workers
//! - [`RecordingFeedIndexer`] - captures fetch requests instead of publishing them
//! - [`FaultyStore`] - store wrapper that fails chosen writes with a conflict

pub mod faulty_store;
pub mod harness;
pub mod indexer;

pub use faulty_store::FaultyStore;
pub use harness::{TestHarness, TestHarnessBuilder};
pub use indexer::RecordingFeedIndexer;
