// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered accept/reject chains.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::filter::{FilterInput, ItemFilter};

/// What a chain decides for an item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilterAction {
    #[default]
    Accept,
    Reject,
}

/// One configured filter, as stored on a composite.
///
/// `action` is only meaningful for top-level chain entries; sub-filters of
/// `or`/`and` leave it out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub op: String,
    #[serde(default)]
    pub negative: bool,
    #[serde(default = "empty_config")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

impl FilterSpec {
    pub fn new(op: impl Into<String>, config: Value, action: FilterAction) -> Self {
        Self {
            op: op.into(),
            negative: false,
            config,
            action: Some(action.to_string()),
        }
    }

    pub fn negated(mut self) -> Self {
        self.negative = !self.negative;
        self
    }
}

/// Filters paired with actions, evaluated first-match-wins.
pub struct FilterChain {
    filters: Vec<(Box<dyn ItemFilter>, FilterAction)>,
    default_action: FilterAction,
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new(FilterAction::Accept)
    }
}

impl FilterChain {
    pub fn new(default_action: FilterAction) -> Self {
        Self {
            filters: Vec::new(),
            default_action,
        }
    }

    pub fn push(&mut self, filter: Box<dyn ItemFilter>, action: FilterAction) {
        self.filters.push((filter, action));
    }

    pub fn set_default_action(&mut self, action: FilterAction) {
        self.default_action = action;
    }

    pub fn default_action(&self) -> FilterAction {
        self.default_action
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// The action of the first matching filter, else the default.
    pub async fn evaluate(&self, input: &FilterInput<'_>) -> FilterAction {
        for (filter, action) in &self.filters {
            if filter.matches(input).await {
                return *action;
            }
        }
        self.default_action
    }
}
