// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The filter trait, its input, and the boolean combinators.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::warn;
use tributary_core::TributaryError;

static NULL: Value = Value::Null;

/// Fetches the full item behind a trimmed item reference.
#[async_trait]
pub trait ItemLoader: Send + Sync {
    /// Return the `details` map of the full item, if it is stored.
    async fn load_details(&self, item: &Value) -> Result<Option<Value>, TributaryError>;
}

/// One item as seen by a filter.
///
/// The trimmed reference fields are always present. The full item's
/// `details` are loaded on first use, at most once per input, so a chain of
/// tag and content matchers costs one store read.
pub struct FilterInput<'a> {
    item: &'a Value,
    loader: Option<&'a dyn ItemLoader>,
    details: OnceCell<Value>,
}

impl<'a> FilterInput<'a> {
    /// An input with no way to load details; detail matchers see nothing.
    pub fn new(item: &'a Value) -> Self {
        Self {
            item,
            loader: None,
            details: OnceCell::new(),
        }
    }

    pub fn with_loader(item: &'a Value, loader: &'a dyn ItemLoader) -> Self {
        Self {
            item,
            loader: Some(loader),
            details: OnceCell::new(),
        }
    }

    /// An input whose details are already known.
    pub fn with_details(item: &'a Value, details: Value) -> Self {
        Self {
            item,
            loader: None,
            details: OnceCell::new_with(Some(details)),
        }
    }

    /// The trimmed item fields.
    pub fn item(&self) -> &Value {
        self.item
    }

    /// A top-level string field of the item, or `""`.
    pub fn field(&self, name: &str) -> &str {
        self.item.get(name).and_then(Value::as_str).unwrap_or("")
    }

    /// The full item's `details`, or `Null` if it cannot be loaded.
    pub async fn details(&self) -> &Value {
        self.details
            .get_or_init(|| async {
                let Some(loader) = self.loader else {
                    return self.item.get("details").cloned().unwrap_or(Value::Null);
                };
                match loader.load_details(self.item).await {
                    Ok(Some(details)) => details,
                    Ok(None) => Value::Null,
                    Err(e) => {
                        let item_id = self.field("item_id");
                        warn!(item_id, error = %e, "failed to load full item for filtering");
                        Value::Null
                    }
                }
            })
            .await
    }

    /// Value at a dotted path inside `details`; `Null` if any step is missing.
    pub async fn detail_path(&self, path: &[String]) -> &Value {
        let mut current = self.details().await;
        for node in path {
            match current {
                Value::Object(map) => current = map.get(node).unwrap_or(&NULL),
                _ => return &NULL,
            }
        }
        current
    }
}

/// A predicate over one item.
#[async_trait]
pub trait ItemFilter: Send + Sync {
    async fn matches(&self, input: &FilterInput<'_>) -> bool;
}

/// Inverts a wrapped filter.
pub struct Negation(pub Box<dyn ItemFilter>);

#[async_trait]
impl ItemFilter for Negation {
    async fn matches(&self, input: &FilterInput<'_>) -> bool {
        !self.0.matches(input).await
    }
}

/// Matches every item.
pub struct MatchAll;

#[async_trait]
impl ItemFilter for MatchAll {
    async fn matches(&self, _input: &FilterInput<'_>) -> bool {
        true
    }
}

/// Matches nothing.
pub struct MatchNone;

#[async_trait]
impl ItemFilter for MatchNone {
    async fn matches(&self, _input: &FilterInput<'_>) -> bool {
        false
    }
}

/// True if any sub-filter matches; false when empty.
pub struct Or(pub Vec<Box<dyn ItemFilter>>);

#[async_trait]
impl ItemFilter for Or {
    async fn matches(&self, input: &FilterInput<'_>) -> bool {
        for filter in &self.0 {
            if filter.matches(input).await {
                return true;
            }
        }
        false
    }
}

/// True if every sub-filter matches; false when empty.
pub struct And(pub Vec<Box<dyn ItemFilter>>);

#[async_trait]
impl ItemFilter for And {
    async fn matches(&self, input: &FilterInput<'_>) -> bool {
        if self.0.is_empty() {
            return false;
        }
        for filter in &self.0 {
            if !filter.matches(input).await {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader(AtomicUsize);

    #[async_trait]
    impl ItemLoader for CountingLoader {
        async fn load_details(&self, _item: &Value) -> Result<Option<Value>, TributaryError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Some(json!({"foo": {"bar": "baz"}})))
        }
    }

    #[tokio::test]
    async fn combinators_on_empty_lists_are_false() {
        let item = json!({});
        let input = FilterInput::new(&item);
        assert!(!Or(Vec::new()).matches(&input).await);
        assert!(!And(Vec::new()).matches(&input).await);
        assert!(Negation(Box::new(And(Vec::new()))).matches(&input).await);
    }

    #[tokio::test]
    async fn or_and_combine_results() {
        let item = json!({});
        let input = FilterInput::new(&item);
        let or = Or(vec![Box::new(MatchNone), Box::new(MatchAll)]);
        let and = And(vec![Box::new(MatchAll), Box::new(MatchNone)]);
        assert!(or.matches(&input).await);
        assert!(!and.matches(&input).await);
    }

    #[tokio::test]
    async fn details_load_once() {
        let loader = CountingLoader(AtomicUsize::new(0));
        let item = json!({"item_id": "x"});
        let input = FilterInput::with_loader(&item, &loader);

        let path = vec!["foo".to_string(), "bar".to_string()];
        assert_eq!(input.detail_path(&path).await, &json!("baz"));
        assert_eq!(input.detail_path(&path[..1]).await, &json!({"bar": "baz"}));
        assert_eq!(loader.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn detail_path_stops_at_non_objects() {
        let item = json!({"details": {"foo": "bar"}});
        let input = FilterInput::new(&item);
        let path = vec!["foo".to_string(), "bar".to_string()];
        assert!(input.detail_path(&path).await.is_null());
    }
}
