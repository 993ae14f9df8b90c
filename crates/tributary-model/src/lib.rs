// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistent news model for Tributary.
//!
//! A [`Bucket`] is a container document plus one [`ItemRef`] document per
//! entry. A [`Composite`] is a bucket fed from other buckets through a filter
//! chain, and a [`RemoteFeed`] is a bucket mirroring an external feed. Every
//! save publishes a [`BucketModified`] event that drives aggregation.

pub mod bucket;
pub mod composite;
pub mod context;
pub mod entries;
pub mod index;
pub mod item;
pub mod notify;
pub mod remote;

pub use bucket::{BUCKET_TYPE, Bucket, generate_id};
pub use composite::{COMPOSITE_TYPE, Composite, Subscription, is_composite};
pub use context::{BackfillSettings, ModelContext};
pub use entries::{ChangeSet, EntryMap};
pub use index::model_indexes;
pub use item::{ItemInput, ItemKey, ItemRef, NewsItem, StoreItemLoader, is_strictly_newer};
pub use notify::{BUCKET_MODIFIED, BucketModified, notify_bucket_modified};
pub use remote::{MAX_HISTORY, REMOTE_FEED_TYPE, RemoteFeed, UpdateRecord};
