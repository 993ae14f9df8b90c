// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! News buckets: a container document plus one document per item reference.
//!
//! Entries load lazily on first access. Mutations accumulate in the
//! [`EntryMap`] change set and are written by [`Bucket::save`] in one bulk
//! update, whose per-document outcomes are applied independently: item
//! writes that succeed stay written even if the container write conflicts.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};
use tributary_core::{Document, DocumentWrite, RangeCursor, RangeQuery, TributaryError};

use crate::context::ModelContext;
use crate::entries::{ChangeSet, EntryMap};
use crate::index::BUCKET_ENTRIES;
use crate::item::{ItemInput, ItemKey, ItemRef, has_type, is_strictly_newer};
use crate::notify::{BucketModified, notify_bucket_modified};

/// Document type tag shared by every bucket kind.
pub const BUCKET_TYPE: &str = "NewsBucket";

/// Rows fetched per round trip when loading entries.
const ENTRY_PAGE: usize = 500;

/// Stored container fields; kind-specific fields land in `extra`.
#[derive(Deserialize)]
struct ContainerFields {
    #[serde(default)]
    document_types: Vec<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "Utc::now")]
    creation_date: DateTime<Utc>,
    #[serde(default)]
    last_modification_date: Option<DateTime<Utc>>,
    #[serde(default)]
    maxlen: Option<usize>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// A persisted, change-tracked container of item references.
pub struct Bucket {
    ctx: ModelContext,
    id: String,
    rev: Option<u64>,
    document_types: Vec<String>,
    pub title: String,
    pub url: String,
    creation_date: DateTime<Utc>,
    last_modification_date: Option<DateTime<Utc>>,
    maxlen: Option<usize>,
    attributes: Map<String, Value>,
    entries: Option<EntryMap>,
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("rev", &self.rev)
            .field("document_types", &self.document_types)
            .field("title", &self.title)
            .finish()
    }
}

/// A stable random id for a new container.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl Bucket {
    /// An unsaved bucket; a random id is assigned if none is given.
    pub fn new(ctx: ModelContext, id: Option<&str>) -> Self {
        Self::with_types(ctx, id, vec![BUCKET_TYPE.to_string()])
    }

    pub(crate) fn with_types(ctx: ModelContext, id: Option<&str>, document_types: Vec<String>) -> Self {
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                let id = generate_id();
                warn!(bucket_id = %id, "assigning random id to bucket");
                id
            }
        };
        Self {
            ctx,
            id,
            rev: None,
            document_types,
            title: String::new(),
            url: String::new(),
            creation_date: Utc::now(),
            last_modification_date: None,
            maxlen: None,
            attributes: Map::new(),
            entries: None,
        }
    }

    /// Load a bucket of any kind.
    pub async fn get(ctx: &ModelContext, id: &str) -> Result<Option<Self>, TributaryError> {
        match ctx.store().get(id).await? {
            Some(doc) if has_type(&doc.body, BUCKET_TYPE) => {
                Ok(Some(Self::from_document(ctx.clone(), doc)?))
            }
            _ => Ok(None),
        }
    }

    pub(crate) fn from_document(ctx: ModelContext, doc: Document) -> Result<Self, TributaryError> {
        let fields: ContainerFields = serde_json::from_value(doc.body)?;
        Ok(Self {
            ctx,
            id: doc.id,
            rev: Some(doc.rev),
            document_types: fields.document_types,
            title: fields.title.unwrap_or_default(),
            url: fields.url.unwrap_or_default(),
            creation_date: fields.creation_date,
            last_modification_date: fields.last_modification_date,
            maxlen: fields.maxlen,
            attributes: fields.extra,
            entries: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Container revision; `None` until first saved.
    pub fn rev(&self) -> Option<u64> {
        self.rev
    }

    pub fn document_types(&self) -> &[String] {
        &self.document_types
    }

    pub fn has_type(&self, doc_type: &str) -> bool {
        self.document_types.iter().any(|t| t == doc_type)
    }

    pub fn creation_date(&self) -> DateTime<Utc> {
        self.creation_date
    }

    pub fn last_modification_date(&self) -> Option<DateTime<Utc>> {
        self.last_modification_date
    }

    pub fn context(&self) -> &ModelContext {
        &self.ctx
    }

    pub fn maxlen(&self) -> Option<usize> {
        self.maxlen
    }

    /// Bound the entry count; lowering it evicts loaded entries at once.
    pub fn set_maxlen(&mut self, maxlen: Option<usize>) {
        if self.maxlen == maxlen {
            return;
        }
        self.maxlen = maxlen;
        if let Some(entries) = self.entries.as_mut() {
            entries.set_maxlen(maxlen);
        }
    }

    pub(crate) fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub(crate) fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    /// The entries, loading them on first access.
    pub async fn entries(&mut self) -> Result<&EntryMap, TributaryError> {
        Ok(self.entries_mut().await?)
    }

    pub async fn len(&mut self) -> Result<usize, TributaryError> {
        Ok(self.entries().await?.len())
    }

    pub async fn is_empty(&mut self) -> Result<bool, TributaryError> {
        Ok(self.entries().await?.is_empty())
    }

    /// Whether entries must be reloaded before the next access.
    pub fn needs_reload(&self) -> bool {
        self.entries.is_none()
    }

    async fn entries_mut(&mut self) -> Result<&mut EntryMap, TributaryError> {
        if self.entries.is_none() {
            let loaded = self.fetch_entries().await?;
            self.entries = Some(loaded);
        }
        let maxlen = self.maxlen;
        Ok(self.entries.get_or_insert_with(|| EntryMap::new(maxlen)))
    }

    async fn fetch_entries(&self) -> Result<EntryMap, TributaryError> {
        let mut entries = EntryMap::new(None);
        if self.rev.is_some() {
            let query = RangeQuery::exact(BUCKET_ENTRIES, self.id.as_str()).include_docs();
            let mut cursor = RangeCursor::new(self.ctx.store().as_ref(), query, ENTRY_PAGE);
            while let Some(rows) = cursor.next_batch().await? {
                for row in rows {
                    let Some(doc) = row.doc else { continue };
                    match ItemRef::from_document(&doc) {
                        Ok(item) => entries.load(item),
                        Err(e) => warn!(bucket_id = %self.id, doc_id = %doc.id, error = %e, "skipping unreadable entry"),
                    }
                }
            }
            debug!(bucket_id = %self.id, count = entries.len(), "entries loaded");
        }
        // Entries beyond capacity are evicted as tracked removals.
        entries.set_maxlen(self.maxlen);
        Ok(entries)
    }

    /// Add or refresh an entry.
    ///
    /// An existing entry is replaced only by a strictly newer timestamp; an
    /// entry removed since the last save is revived unconditionally. Returns
    /// whether anything changed.
    pub async fn add_news_item(&mut self, item: impl Into<ItemInput>) -> Result<bool, TributaryError> {
        let item = item.into().into_ref(&self.id)?;
        let entries = self.entries_mut().await?;

        if let Some(current) = entries.get(&item.item_id) {
            if !is_strictly_newer(item.timestamp, current.timestamp) {
                return Ok(false);
            }
            let mut current = current.clone();
            current.update_from(&item);
            entries.insert(current);
            return Ok(true);
        }

        if let Some(mut trashed) = entries.take_removed(&item.item_id) {
            trashed.update_from(&item);
            entries.insert(trashed);
            return Ok(true);
        }

        entries.insert(item);
        Ok(true)
    }

    pub async fn remove_news_item<K: ItemKey + ?Sized>(&mut self, item: &K) -> Result<bool, TributaryError> {
        let Some(key) = item.item_key() else {
            return Ok(false);
        };
        Ok(self.entries_mut().await?.remove(key).is_some())
    }

    pub async fn has_news_item<K: ItemKey + ?Sized>(&mut self, item: &K) -> Result<bool, TributaryError> {
        let Some(key) = item.item_key() else {
            return Ok(false);
        };
        Ok(self.entries().await?.contains(key))
    }

    /// Remove every entry failing `keep`; returns the removed ids.
    pub async fn filter_entries<F>(&mut self, keep: F) -> Result<Vec<String>, TributaryError>
    where
        F: Fn(&ItemRef) -> bool,
    {
        let entries = self.entries_mut().await?;
        let doomed: Vec<String> = entries
            .iter()
            .filter(|item| !keep(item))
            .map(|item| item.item_id.clone())
            .collect();
        for id in &doomed {
            entries.remove(id);
        }
        Ok(doomed)
    }

    pub async fn clear(&mut self) -> Result<(), TributaryError> {
        self.entries_mut().await?.clear();
        Ok(())
    }

    fn container_body(&self) -> Result<Value, TributaryError> {
        let mut body = self.attributes.clone();
        body.insert("document_types".into(), json!(self.document_types));
        body.insert("title".into(), json!(self.title));
        body.insert("url".into(), json!(self.url));
        body.insert("creation_date".into(), serde_json::to_value(self.creation_date)?);
        body.insert(
            "last_modification_date".into(),
            serde_json::to_value(self.last_modification_date)?,
        );
        if let Some(maxlen) = self.maxlen {
            body.insert("maxlen".into(), json!(maxlen));
        }
        Ok(Value::Object(body))
    }

    /// Persist the container and pending entry changes, then announce them.
    ///
    /// A container conflict is returned as [`TributaryError::Conflict`] after
    /// the successful item writes have been announced; entries reload on
    /// next access.
    pub async fn save(&mut self) -> Result<(), TributaryError> {
        self.save_with_event(BucketModified::default()).await
    }

    /// [`save`](Self::save) with extra fields on the announcement.
    pub(crate) async fn save_with_event(&mut self, mut event: BucketModified) -> Result<(), TributaryError> {
        self.last_modification_date = Some(Utc::now());
        let changes = self
            .entries
            .as_mut()
            .map(EntryMap::take_dirty)
            .unwrap_or_else(ChangeSet::default);

        let mut writes = Vec::with_capacity(1 + changes.updated.len() + changes.removed.len());
        writes.push(DocumentWrite::put(self.id.clone(), self.rev, self.container_body()?));

        let mut updates = Vec::with_capacity(changes.updated.len());
        for item in changes.updated {
            writes.push(DocumentWrite::put(item.id(), item.rev(), item.to_body()?));
            updates.push(item);
        }
        let mut deletes = Vec::with_capacity(changes.removed.len());
        for item in changes.removed {
            if let Some(rev) = item.rev() {
                writes.push(DocumentWrite::delete(item.id(), rev));
                deletes.push(item);
            }
        }

        let outcomes = match self.ctx.store().bulk_update(writes).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                self.entries = None;
                return Err(e);
            }
        };
        let mut outcomes = outcomes.into_iter();
        let container = outcomes
            .next()
            .ok_or_else(|| TributaryError::Internal(format!("no write outcome for {}", self.id)))?;
        if let Some(rev) = container.rev() {
            self.rev = Some(rev);
        }

        let mut item_failures = 0usize;
        for (mut item, outcome) in updates.into_iter().zip(outcomes.by_ref()) {
            match outcome.rev() {
                Some(rev) => {
                    item.set_rev(Some(rev));
                    if let Some(entries) = self.entries.as_mut() {
                        entries.set_rev(&item.item_id, rev);
                    }
                    event.updated_items.push(item);
                }
                None => {
                    item_failures += 1;
                    warn!(bucket_id = %self.id, item_id = %item.item_id, status = ?outcome.status, "entry write failed");
                }
            }
        }
        for (item, outcome) in deletes.into_iter().zip(outcomes.by_ref()) {
            if outcome.is_ok() {
                event.removed_items.push(item);
            } else {
                item_failures += 1;
                warn!(bucket_id = %self.id, item_id = %item.item_id, status = ?outcome.status, "entry delete failed");
            }
        }

        event.bucket_id = self.id.clone();
        event.bucket_types = self.document_types.clone();
        notify_bucket_modified(&self.ctx, &event).await;

        if item_failures > 0 || !container.is_ok() {
            self.entries = None;
        }
        container.into_result().map(|_| ())
    }

    /// Delete the container and every stored entry.
    pub async fn delete(&mut self) -> Result<(), TributaryError> {
        let entries = self.fetch_entries().await?;
        let mut writes = Vec::with_capacity(entries.len() + 1);
        if let Some(rev) = self.rev {
            writes.push(DocumentWrite::delete(self.id.clone(), rev));
        }
        for item in entries.iter() {
            if let Some(rev) = item.rev() {
                writes.push(DocumentWrite::delete(item.id(), rev));
            }
        }
        let outcomes = self.ctx.store().bulk_update(writes).await?;
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.is_ok())
            .map(|o| o.id.as_str())
            .collect();
        if !failed.is_empty() {
            warn!(bucket_id = %self.id, ?failed, "some bucket documents were not deleted");
        }
        let container_failed = self.rev.is_some() && outcomes.first().is_some_and(|o| !o.is_ok());
        self.entries = None;
        if container_failed {
            return Err(TributaryError::Conflict { id: self.id.clone() });
        }
        self.rev = None;
        Ok(())
    }

    /// Write one entry straight to the store without loading the bucket.
    ///
    /// Unsaved changes to the same entry are discarded. Returns false if the
    /// stored entry is at least as new or the write conflicts.
    pub async fn immediate_add(&mut self, item: impl Into<ItemInput>) -> Result<bool, TributaryError> {
        let item = item.into().into_ref(&self.id)?;
        let store = self.ctx.store().clone();
        let mut to_save = match store.get(&item.id()).await? {
            None => item,
            Some(doc) => {
                let mut current = ItemRef::from_document(&doc)?;
                if !is_strictly_newer(item.timestamp, current.timestamp) {
                    return Ok(false);
                }
                current.update_from(&item);
                current
            }
        };

        match store.put(&to_save.id(), to_save.rev(), to_save.to_body()?).await {
            Ok(rev) => {
                to_save.set_rev(Some(rev));
                if let Some(entries) = self.entries.as_mut() {
                    entries.clobber(to_save.clone());
                }
                let mut event = BucketModified::new(self.id.clone(), self.document_types.clone());
                event.updated_items.push(to_save);
                notify_bucket_modified(&self.ctx, &event).await;
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                debug!(bucket_id = %self.id, item_id = %to_save.item_id, "immediate add lost a race");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
