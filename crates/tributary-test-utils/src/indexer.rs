// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Feed indexer that records requests for assertion in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use tributary_core::{FeedIndexer, TributaryError};

/// A fetch trigger that only remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingFeedIndexer {
    requested: Mutex<Vec<String>>,
    scheduled: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl RecordingFeedIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs passed to `request_feed_index`, in call order.
    pub async fn requested(&self) -> Vec<String> {
        self.requested.lock().await.clone()
    }

    /// URLs and times passed to `schedule_feed_index`, in call order.
    pub async fn scheduled(&self) -> Vec<(String, DateTime<Utc>)> {
        self.scheduled.lock().await.clone()
    }
}

#[async_trait]
impl FeedIndexer for RecordingFeedIndexer {
    async fn request_feed_index(&self, url: &str) -> Result<(), TributaryError> {
        self.requested.lock().await.push(url.to_string());
        Ok(())
    }

    async fn schedule_feed_index(&self, url: &str, at: DateTime<Utc>) -> Result<(), TributaryError> {
        self.scheduled.lock().await.push((url.to_string(), at));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_both_kinds_of_request() {
        let indexer = RecordingFeedIndexer::new();
        indexer.request_feed_index("http://a/rss").await.unwrap();
        let at = Utc::now();
        indexer.schedule_feed_index("http://b/rss", at).await.unwrap();
        assert_eq!(indexer.requested().await, vec!["http://a/rss".to_string()]);
        assert_eq!(indexer.scheduled().await, vec![("http://b/rss".to_string(), at)]);
    }
}
