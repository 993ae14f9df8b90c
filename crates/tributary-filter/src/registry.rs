// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filter registry mapping op names to filter constructors.
//!
//! The `FilterRegistry` stores `FilterEntry` records keyed by op name. Each
//! entry holds a status and a factory. Chains are built from stored
//! [`FilterSpec`]s; an entry that cannot be built is logged and left out of
//! the chain instead of failing it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;
use tributary_config::model::FiltersConfig;
use tributary_core::TributaryError;

use crate::chain::{FilterAction, FilterChain, FilterSpec};
use crate::filter::{And, ItemFilter, MatchAll, MatchNone, Negation, Or};
use crate::matchers::{FieldMatch, FieldSource};

/// Status of a filter op in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStatus {
    /// Op is available to chains.
    Enabled,
    /// Op is known but switched off by configuration.
    Disabled,
}

impl std::fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterStatus::Enabled => write!(f, "enabled"),
            FilterStatus::Disabled => write!(f, "disabled"),
        }
    }
}

/// Builds a filter from its JSON config.
///
/// The registry is passed in so combinators can build their sub-filters.
pub trait FilterFactory: Send + Sync {
    fn create(
        &self,
        registry: &FilterRegistry,
        config: &Value,
    ) -> Result<Box<dyn ItemFilter>, TributaryError>;
}

impl<F> FilterFactory for F
where
    F: Fn(&FilterRegistry, &Value) -> Result<Box<dyn ItemFilter>, TributaryError> + Send + Sync,
{
    fn create(
        &self,
        registry: &FilterRegistry,
        config: &Value,
    ) -> Result<Box<dyn ItemFilter>, TributaryError> {
        self(registry, config)
    }
}

/// A single entry in the filter registry.
pub struct FilterEntry {
    pub op: String,
    pub status: FilterStatus,
    pub factory: Box<dyn FilterFactory>,
}

impl std::fmt::Debug for FilterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEntry")
            .field("op", &self.op)
            .field("status", &self.status)
            .finish()
    }
}

/// Registry of filter ops available to composite chains.
pub struct FilterRegistry {
    entries: HashMap<String, FilterEntry>,
    default_action: FilterAction,
}

impl FilterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            default_action: FilterAction::Accept,
        }
    }

    /// A registry holding every built-in op.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Built-ins with the configured default action and disabled ops.
    pub fn from_config(config: &FiltersConfig) -> Result<Self, TributaryError> {
        let mut registry = Self::with_builtins();
        registry.default_action = config.default_action.parse().map_err(|_| {
            TributaryError::Config(format!(
                "unknown filter default action: {}",
                config.default_action
            ))
        })?;
        for op in &config.disabled {
            registry.set_enabled(op, false)?;
        }
        Ok(registry)
    }

    fn register_builtins(&mut self) {
        self.register("match_all", |_: &FilterRegistry, _: &Value| {
            Ok(Box::new(MatchAll) as Box<dyn ItemFilter>)
        });
        self.register("match_none", |_: &FilterRegistry, _: &Value| {
            Ok(Box::new(MatchNone) as Box<dyn ItemFilter>)
        });
        self.register("or", |registry: &FilterRegistry, config: &Value| {
            Ok(Box::new(Or(registry.sub_filters(config))) as Box<dyn ItemFilter>)
        });
        self.register("and", |registry: &FilterRegistry, config: &Value| {
            Ok(Box::new(And(registry.sub_filters(config))) as Box<dyn ItemFilter>)
        });
        let sources = [
            ("match_author", FieldSource::Author),
            ("match_title", FieldSource::Title),
            ("match_source", FieldSource::Source),
            ("match_tag", FieldSource::Tag),
            ("match_content", FieldSource::Content),
        ];
        for (op, source) in sources {
            self.register(op, move |_: &FilterRegistry, config: &Value| {
                Ok(Box::new(FieldMatch::from_config(source.clone(), config)?) as Box<dyn ItemFilter>)
            });
        }
        self.register("match_field", |_: &FilterRegistry, config: &Value| {
            Ok(Box::new(FieldMatch::field_from_config(config)?) as Box<dyn ItemFilter>)
        });
    }

    /// Register an op with default status `Enabled`, replacing any previous entry.
    pub fn register(&mut self, op: &str, factory: impl FilterFactory + 'static) {
        self.register_with_status(op, factory, FilterStatus::Enabled);
    }

    /// Register an op with an explicit status.
    pub fn register_with_status(
        &mut self,
        op: &str,
        factory: impl FilterFactory + 'static,
        status: FilterStatus,
    ) {
        self.entries.insert(
            op.to_string(),
            FilterEntry {
                op: op.to_string(),
                status,
                factory: Box::new(factory),
            },
        );
    }

    /// Get an entry by op name.
    pub fn get(&self, op: &str) -> Option<&FilterEntry> {
        self.entries.get(op)
    }

    /// List all entries, sorted by op.
    pub fn list_all(&self) -> Vec<&FilterEntry> {
        let mut entries: Vec<&FilterEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.op.cmp(&b.op));
        entries
    }

    /// Toggle an op's enabled status.
    pub fn set_enabled(&mut self, op: &str, enabled: bool) -> Result<(), TributaryError> {
        let entry = self
            .entries
            .get_mut(op)
            .ok_or_else(|| TributaryError::AdapterNotFound {
                adapter_type: "filter".to_string(),
                name: op.to_string(),
            })?;
        entry.status = if enabled {
            FilterStatus::Enabled
        } else {
            FilterStatus::Disabled
        };
        Ok(())
    }

    pub fn default_action(&self) -> FilterAction {
        self.default_action
    }

    /// Returns the number of registered ops.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no ops are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build one filter, wrapping it in [`Negation`] if `negative`.
    ///
    /// Unknown or disabled ops and construction errors are logged and
    /// yield `None`.
    pub fn create_filter(
        &self,
        op: &str,
        config: &Value,
        negative: bool,
    ) -> Option<Box<dyn ItemFilter>> {
        let Some(entry) = self.entries.get(op) else {
            warn!(op, "ignoring unsupported filter type");
            return None;
        };
        if entry.status == FilterStatus::Disabled {
            warn!(op, "ignoring disabled filter type");
            return None;
        }
        match entry.factory.create(self, config) {
            Ok(filter) if negative => Some(Box::new(Negation(filter))),
            Ok(filter) => Some(filter),
            Err(e) => {
                warn!(op, error = %e, "error creating filter, skipping");
                None
            }
        }
    }

    /// Build a chain from stored specs, skipping entries that fail to build.
    ///
    /// An entry whose action is missing or unknown rejects on match.
    pub fn create_chain(&self, specs: &[FilterSpec]) -> FilterChain {
        let mut chain = FilterChain::new(self.default_action);
        for spec in specs {
            let Some(filter) = self.create_filter(&spec.op, &spec.config, spec.negative) else {
                continue;
            };
            let action = match spec.action.as_deref().map(str::parse::<FilterAction>) {
                Some(Ok(action)) => action,
                other => {
                    warn!(
                        op = %spec.op,
                        action = ?spec.action,
                        parsed = other.is_some(),
                        "unknown filter action, treating as reject"
                    );
                    FilterAction::Reject
                }
            };
            chain.push(filter, action);
        }
        chain
    }

    /// Sub-filters listed under `config.filters`, for combinators.
    fn sub_filters(&self, config: &Value) -> Vec<Box<dyn ItemFilter>> {
        let specs = config
            .get("filters")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        specs
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<FilterSpec>(raw) {
                Ok(spec) => self.create_filter(&spec.op, &spec.config, spec.negative),
                Err(e) => {
                    warn!(error = %e, "ignoring malformed sub-filter");
                    None
                }
            })
            .collect()
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
