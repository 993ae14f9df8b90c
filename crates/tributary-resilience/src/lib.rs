// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the Tributary aggregator.
//!
//! - [`retry_on_conflict`] re-runs a read-modify-write cycle with randomized
//!   exponential backoff while the store reports optimistic-concurrency
//!   conflicts.
//! - [`ExponentialBackoff`] is the capped `2^n` seconds schedule used by
//!   consumer reconnects, with [`capped_delay`] exposing the same curve for
//!   the scheduler's dispatch retries.

pub mod backoff;
pub mod retry;

pub use backoff::{ExponentialBackoff, capped_delay};
pub use retry::{RetryPolicy, retry_on_conflict};
