// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Remote feeds: buckets filled by the external fetch subsystem.

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tributary_core::TributaryError;
use tributary_filter::canonical_url;

use crate::bucket::{BUCKET_TYPE, Bucket};
use crate::context::ModelContext;

/// Document type tag of a remote feed.
pub const REMOTE_FEED_TYPE: &str = "RemoteFeed";

/// Update records kept per feed.
pub const MAX_HISTORY: usize = 10;

/// The outcome of one fetch of a remote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updates: u64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub method: String,
}

fn default_success() -> bool {
    true
}

impl UpdateRecord {
    pub fn success(updates: u64, method: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            updates,
            success: true,
            reason: String::new(),
            method: method.into(),
        }
    }

    pub fn failure(reason: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            updates: 0,
            success: false,
            reason: reason.into(),
            method: method.into(),
        }
    }
}

/// A bucket mirroring a feed at `url`.
pub struct RemoteFeed {
    bucket: Bucket,
    update_history: Vec<UpdateRecord>,
}

impl Deref for RemoteFeed {
    type Target = Bucket;

    fn deref(&self) -> &Bucket {
        &self.bucket
    }
}

impl DerefMut for RemoteFeed {
    fn deref_mut(&mut self) -> &mut Bucket {
        &mut self.bucket
    }
}

impl RemoteFeed {
    /// The feed id for `url`: hex SHA-256 of the canonical, lowercased url.
    pub fn id_for_url(url: &str) -> String {
        let normalized = canonical_url(url).to_lowercase();
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// An unsaved feed for `url`.
    pub fn create_from_url(ctx: ModelContext, url: &str) -> Self {
        let id = Self::id_for_url(url);
        let types = vec![BUCKET_TYPE.to_string(), REMOTE_FEED_TYPE.to_string()];
        let mut bucket = Bucket::with_types(ctx, Some(&id), types);
        bucket.url = url.to_string();
        Self {
            bucket,
            update_history: Vec::new(),
        }
    }

    pub async fn lookup_by_url(ctx: &ModelContext, url: &str) -> Result<Option<Self>, TributaryError> {
        Self::get(ctx, &Self::id_for_url(url)).await
    }

    /// Load a feed; `None` if missing or not a remote feed.
    pub async fn get(ctx: &ModelContext, id: &str) -> Result<Option<Self>, TributaryError> {
        match Bucket::get(ctx, id).await? {
            Some(bucket) if bucket.has_type(REMOTE_FEED_TYPE) => Ok(Some(Self::from_bucket(bucket)?)),
            _ => Ok(None),
        }
    }

    /// View a loaded bucket as a remote feed.
    pub fn from_bucket(bucket: Bucket) -> Result<Self, TributaryError> {
        let update_history = match bucket.attribute("update_history") {
            Some(Value::Null) | None => Vec::new(),
            Some(raw) => serde_json::from_value(raw.clone())?,
        };
        Ok(Self {
            bucket,
            update_history,
        })
    }

    /// Newest first.
    pub fn update_history(&self) -> &[UpdateRecord] {
        &self.update_history
    }

    /// True until the first fetch has been recorded.
    pub fn never_fetched(&self) -> bool {
        self.update_history.is_empty()
    }

    pub fn record_update_info(&mut self, record: UpdateRecord) {
        self.update_history.insert(0, record);
        self.update_history.truncate(MAX_HISTORY);
    }

    pub fn into_bucket(self) -> Bucket {
        self.bucket
    }

    pub async fn save(&mut self) -> Result<(), TributaryError> {
        let history = serde_json::to_value(&self.update_history)?;
        self.bucket.set_attribute("update_history", history);
        self.bucket.save().await
    }
}
