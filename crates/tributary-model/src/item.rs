// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! News items and the trimmed references buckets hold.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tributary_core::{Document, DocumentStore, TributaryError};
use tributary_filter::ItemLoader;

/// Document type tag of an item reference.
pub const ITEM_REF_TYPE: &str = "NewsItemRef";

/// Document type tag of a full item.
pub const NEWS_ITEM_TYPE: &str = "NewsItem";

fn now_some() -> Option<DateTime<Utc>> {
    Some(Utc::now())
}

/// Whether `incoming` should overwrite an entry stamped `current`.
///
/// Only a strictly later timestamp wins; a missing incoming timestamp never
/// does, and any timestamp beats a missing one.
pub fn is_strictly_newer(incoming: Option<DateTime<Utc>>, current: Option<DateTime<Utc>>) -> bool {
    match (incoming, current) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(a), Some(b)) => a > b,
    }
}

/// A compact record of a source item, owned by one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
    #[serde(default)]
    pub bucket_id: String,
    /// Source-claimed event time. Absent in input means "now"; explicit
    /// `null` is kept and never wins a timestamp comparison.
    #[serde(default = "now_some")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default = "Utc::now")]
    pub add_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip)]
    rev: Option<u64>,
}

impl ItemRef {
    /// A bare reference carrying only an id, stamped now.
    pub fn new(bucket_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            bucket_id: bucket_id.into(),
            timestamp: Some(Utc::now()),
            add_time: Utc::now(),
            title: None,
            author: None,
            link: None,
            source_title: None,
            source_url: None,
            summary: None,
            rev: None,
        }
    }

    /// Document id of the reference to `item_id` inside `bucket_id`.
    pub fn doc_id(bucket_id: &str, item_id: &str) -> String {
        format!("{bucket_id}_{item_id}")
    }

    pub fn id(&self) -> String {
        Self::doc_id(&self.bucket_id, &self.item_id)
    }

    /// Stored revision, `None` until first saved.
    pub fn rev(&self) -> Option<u64> {
        self.rev
    }

    pub(crate) fn set_rev(&mut self, rev: Option<u64>) {
        self.rev = rev;
    }

    /// Overwrite every replicated field with `other`'s.
    pub fn update_from(&mut self, other: &ItemRef) {
        self.item_id.clone_from(&other.item_id);
        self.timestamp = other.timestamp;
        self.title.clone_from(&other.title);
        self.author.clone_from(&other.author);
        self.link.clone_from(&other.link);
        self.source_title.clone_from(&other.source_title);
        self.source_url.clone_from(&other.source_url);
        self.summary.clone_from(&other.summary);
    }

    /// A fresh reference in `bucket_id` replicating `item`'s fields.
    pub fn from_news_item(bucket_id: &str, item: &NewsItem) -> Self {
        Self {
            item_id: item.item_id.clone(),
            bucket_id: bucket_id.to_string(),
            timestamp: item.timestamp,
            add_time: Utc::now(),
            title: item.title.clone(),
            author: item.author.clone(),
            link: item.link.clone(),
            source_title: item.source_title.clone(),
            source_url: item.source_url.clone(),
            summary: item.summary.clone(),
            rev: None,
        }
    }

    /// Body of the stored document.
    pub fn to_body(&self) -> Result<Value, TributaryError> {
        let mut body = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut body {
            map.insert("document_types".into(), serde_json::json!([ITEM_REF_TYPE]));
        }
        Ok(body)
    }

    pub fn from_document(doc: &Document) -> Result<Self, TributaryError> {
        let mut item: ItemRef = serde_json::from_value(doc.body.clone())?;
        item.rev = Some(doc.rev);
        Ok(item)
    }
}

/// A full item with its parsed feed details.
///
/// Stored under its own `item_id`, independent of any bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub item_id: String,
    #[serde(default = "now_some")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Tags, content nodes, summary detail and anything else the parser kept.
    #[serde(default)]
    pub details: Value,
    #[serde(skip)]
    rev: Option<u64>,
}

impl NewsItem {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            timestamp: Some(Utc::now()),
            title: None,
            author: None,
            link: None,
            source_title: None,
            source_url: None,
            summary: None,
            details: Value::Object(Map::new()),
            rev: None,
        }
    }

    pub fn rev(&self) -> Option<u64> {
        self.rev
    }

    pub async fn get(store: &dyn DocumentStore, item_id: &str) -> Result<Option<Self>, TributaryError> {
        let Some(doc) = store.get(item_id).await? else {
            return Ok(None);
        };
        if !has_type(&doc.body, NEWS_ITEM_TYPE) {
            return Ok(None);
        }
        let mut item: NewsItem = serde_json::from_value(doc.body)?;
        item.rev = Some(doc.rev);
        Ok(Some(item))
    }

    /// Create or replace the stored item at its current revision.
    pub async fn save(&mut self, store: &dyn DocumentStore) -> Result<(), TributaryError> {
        let mut body = serde_json::to_value(&*self)?;
        if let Value::Object(map) = &mut body {
            map.insert("document_types".into(), serde_json::json!([NEWS_ITEM_TYPE]));
        }
        let rev = store.put(&self.item_id, self.rev, body).await?;
        self.rev = Some(rev);
        Ok(())
    }
}

/// True if a stored body lists `doc_type` among its `document_types`.
pub fn has_type(body: &Value, doc_type: &str) -> bool {
    body.get("document_types")
        .and_then(Value::as_array)
        .is_some_and(|types| types.iter().any(|t| t.as_str() == Some(doc_type)))
}

/// Anything a bucket accepts as an item to add.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemInput {
    /// Just an id; the reference is stamped now.
    Id(String),
    /// A full item, whose replicated fields are copied.
    Full(NewsItem),
    /// A reference from another bucket.
    Ref(ItemRef),
    /// Loose fields, which must include `item_id`.
    Raw(Map<String, Value>),
}

impl ItemInput {
    /// Interpret a JSON string as an id and an object as loose fields.
    pub fn from_value(value: Value) -> Result<Self, TributaryError> {
        match value {
            Value::String(id) => Ok(ItemInput::Id(id)),
            Value::Object(map) => Ok(ItemInput::Raw(map)),
            other => Err(TributaryError::malformed(format!(
                "item must be an id or an object, got {other}"
            ))),
        }
    }

    /// Normalize into a reference owned by `bucket_id`.
    pub fn into_ref(self, bucket_id: &str) -> Result<ItemRef, TributaryError> {
        match self {
            ItemInput::Id(id) => Ok(ItemRef::new(bucket_id, id)),
            ItemInput::Full(item) => Ok(ItemRef::from_news_item(bucket_id, &item)),
            ItemInput::Ref(other) => {
                let mut item = ItemRef::new(bucket_id, other.item_id.clone());
                item.update_from(&other);
                Ok(item)
            }
            ItemInput::Raw(mut map) => {
                map.insert("bucket_id".into(), Value::String(bucket_id.to_string()));
                serde_json::from_value(Value::Object(map))
                    .map_err(|e| TributaryError::malformed(format!("invalid item: {e}")))
            }
        }
    }
}

impl From<&str> for ItemInput {
    fn from(id: &str) -> Self {
        ItemInput::Id(id.to_string())
    }
}

impl From<String> for ItemInput {
    fn from(id: String) -> Self {
        ItemInput::Id(id)
    }
}

impl From<NewsItem> for ItemInput {
    fn from(item: NewsItem) -> Self {
        ItemInput::Full(item)
    }
}

impl From<ItemRef> for ItemInput {
    fn from(item: ItemRef) -> Self {
        ItemInput::Ref(item)
    }
}

impl From<Map<String, Value>> for ItemInput {
    fn from(map: Map<String, Value>) -> Self {
        ItemInput::Raw(map)
    }
}

/// Something that names an item: an id, an item, or an object with `item_id`.
pub trait ItemKey {
    fn item_key(&self) -> Option<&str>;
}

impl ItemKey for str {
    fn item_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl ItemKey for String {
    fn item_key(&self) -> Option<&str> {
        Some(self)
    }
}

impl ItemKey for ItemRef {
    fn item_key(&self) -> Option<&str> {
        Some(&self.item_id)
    }
}

impl ItemKey for NewsItem {
    fn item_key(&self) -> Option<&str> {
        Some(&self.item_id)
    }
}

impl ItemKey for Value {
    fn item_key(&self) -> Option<&str> {
        match self {
            Value::String(id) => Some(id),
            Value::Object(map) => map.get("item_id").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Loads full item details from the document store for filters.
pub struct StoreItemLoader {
    store: Arc<dyn DocumentStore>,
}

impl StoreItemLoader {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ItemLoader for StoreItemLoader {
    async fn load_details(&self, item: &Value) -> Result<Option<Value>, TributaryError> {
        let Some(item_id) = item.item_key() else {
            return Ok(None);
        };
        Ok(NewsItem::get(self.store.as_ref(), item_id)
            .await?
            .map(|full| full.details))
    }
}
