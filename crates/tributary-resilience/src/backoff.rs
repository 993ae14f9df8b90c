// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capped exponential backoff.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default exponent at which the delay stops doubling.
pub const DEFAULT_CAP_EXPONENT: u32 = 10;

/// Default delay once the cap is reached.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);

/// `2^failures` seconds while `failures < cap_exponent`, `max_delay` after.
pub fn capped_delay(failures: u32, cap_exponent: u32, max_delay: Duration) -> Duration {
    if failures < cap_exponent {
        Duration::from_secs(1u64 << failures.min(63))
    } else {
        max_delay
    }
}

/// Failure counter that turns consecutive failures into sleeps.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    cap_exponent: u32,
    max_delay: Duration,
    failures: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_CAP_EXPONENT, DEFAULT_MAX_DELAY)
    }
}

impl ExponentialBackoff {
    pub fn new(cap_exponent: u32, max_delay: Duration) -> Self {
        Self {
            cap_exponent,
            max_delay,
            failures: 0,
        }
    }

    /// Consecutive failures since the last [`reset`](Self::reset).
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = capped_delay(self.failures, self.cap_exponent, self.max_delay);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and sleep it off.
    ///
    /// Returns `false` if `cancel` fired during the sleep.
    pub async fn sleep(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        warn!(
            failures = self.failures,
            delay_secs = delay.as_secs(),
            "backing off before retry"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
