// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TributaryError;

/// Trigger for the external feed fetch subsystem.
#[async_trait]
pub trait FeedIndexer: Send + Sync {
    /// Ask for `url` to be fetched and indexed as soon as possible.
    async fn request_feed_index(&self, url: &str) -> Result<(), TributaryError>;

    /// Ask for `url` to be fetched at `at`.
    async fn schedule_feed_index(
        &self,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TributaryError>;
}
