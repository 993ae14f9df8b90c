// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Primitive matchers: a [`Pattern`] applied to one aspect of an item.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tributary_core::TributaryError;

use crate::filter::{FilterInput, ItemFilter};
use crate::pattern::{Pattern, canonical_url, stripped_content};

/// Which part of the item a matcher looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// `author`, lowercased and trimmed.
    Author,
    /// `title` as stored.
    Title,
    /// `source_url`, canonicalized.
    Source,
    /// Every tag label (or term) in the full item, lowercased and trimmed.
    Tag,
    /// The full item's first content node, or its summary, as plain text.
    Content,
    /// A dotted path into the full item's details.
    Field(Vec<String>),
}

/// A pattern bound to a [`FieldSource`].
pub struct FieldMatch {
    source: FieldSource,
    pattern: Pattern,
}

impl FieldMatch {
    pub fn new(source: FieldSource, pattern: Pattern) -> Self {
        Self { source, pattern }
    }

    pub fn from_config(source: FieldSource, config: &Value) -> Result<Self, TributaryError> {
        Ok(Self::new(source, Pattern::from_config(config)?))
    }

    /// `match_field` with its `field` path taken from `config`.
    ///
    /// A missing `field` yields a matcher that never matches.
    pub fn field_from_config(config: &Value) -> Result<Self, TributaryError> {
        let path = config
            .get("field")
            .and_then(Value::as_str)
            .map(|p| p.split('.').map(str::to_string).collect())
            .unwrap_or_default();
        Self::from_config(FieldSource::Field(path), config)
    }
}

fn item_tags(details: &Value) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    let Some(entries) = details.get("tags").and_then(Value::as_array) else {
        return tags;
    };
    for tag in entries {
        let label = tag
            .get("label")
            .and_then(Value::as_str)
            .filter(|l| !l.is_empty())
            .or_else(|| tag.get("term").and_then(Value::as_str));
        if let Some(label) = label {
            let normalized = label.trim().to_lowercase();
            if !normalized.is_empty() {
                tags.insert(normalized);
            }
        }
    }
    tags
}

#[async_trait]
impl ItemFilter for FieldMatch {
    async fn matches(&self, input: &FilterInput<'_>) -> bool {
        match &self.source {
            FieldSource::Author => self
                .pattern
                .is_match_str(&input.field("author").trim().to_lowercase()),
            FieldSource::Title => self.pattern.is_match_str(input.field("title")),
            FieldSource::Source => self
                .pattern
                .is_match_str(&canonical_url(input.field("source_url"))),
            FieldSource::Tag => item_tags(input.details().await)
                .iter()
                .any(|tag| self.pattern.is_match_str(tag)),
            FieldSource::Content => {
                let details = input.details().await;
                let content = details
                    .get("content")
                    .and_then(Value::as_array)
                    .and_then(|nodes| nodes.first())
                    .or_else(|| details.get("summary_detail"));
                self.pattern.is_match_str(&stripped_content(content))
            }
            FieldSource::Field(path) => {
                if path.is_empty() {
                    return false;
                }
                self.pattern.is_match(input.detail_path(path).await)
            }
        }
    }
}
