// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry of optimistic-concurrency conflicts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};
use tributary_config::model::RetryConfig;
use tributary_core::TributaryError;

/// Attempts logged at `warn` from this execution onward.
const WARN_FROM_ATTEMPT: u32 = 3;

/// How often and how patiently to retry a conflicting write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total executions, including the first.
    pub max_attempts: u32,
    /// Sleep before the second execution.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests and tight loops.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the policy
/// runs out of attempts.
///
/// `op` receives the 1-based attempt number and must redo its whole
/// read-modify-write cycle each time. Between attempts the delay grows by a
/// random factor in `[1.5, 2)`, so racing writers drift apart.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, TributaryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, TributaryError>>,
{
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Err(e) if e.is_conflict() && attempt < policy.max_attempts => {
                if attempt >= WARN_FROM_ATTEMPT {
                    warn!(attempt, error = %e, "write still conflicting, retrying");
                } else {
                    debug!(attempt, error = %e, "write conflict, retrying");
                }
                tokio::time::sleep(delay).await;
                let factor = rand::thread_rng().gen_range(1.5..2.0);
                delay = delay.mul_f64(factor);
                attempt += 1;
            }
            Err(e) if e.is_conflict() => {
                warn!(attempts = attempt, error = %e, "giving up on conflicting write");
                return Err(e);
            }
            other => return other,
        }
    }
}
