// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared handles every model object carries.

use std::sync::Arc;
use std::time::Duration;

use tributary_bus::MessageDispatch;
use tributary_config::TributaryConfig;
use tributary_core::{DocumentStore, TributaryError};
use tributary_filter::FilterRegistry;
use tributary_resilience::RetryPolicy;

/// How a new subscription is backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSettings {
    /// Most recent items copied.
    pub limit: usize,
    /// Only items stamped within this window are copied.
    pub lookback: Duration,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            limit: 50,
            lookback: Duration::from_secs(86_400),
        }
    }
}

/// Store, publisher, filter registry and tuning, passed by value into
/// buckets and workers.
#[derive(Clone)]
pub struct ModelContext {
    store: Arc<dyn DocumentStore>,
    dispatch: MessageDispatch,
    filters: Arc<FilterRegistry>,
    retry: RetryPolicy,
    backfill: BackfillSettings,
}

impl ModelContext {
    /// A context with built-in filters and default tuning.
    pub fn new(store: Arc<dyn DocumentStore>, dispatch: MessageDispatch) -> Self {
        Self {
            store,
            dispatch,
            filters: Arc::new(FilterRegistry::with_builtins()),
            retry: RetryPolicy::default(),
            backfill: BackfillSettings::default(),
        }
    }

    /// A context tuned from the loaded configuration.
    pub fn from_config(
        store: Arc<dyn DocumentStore>,
        dispatch: MessageDispatch,
        config: &TributaryConfig,
    ) -> Result<Self, TributaryError> {
        let filters = FilterRegistry::from_config(&config.filters)?;
        Ok(Self::new(store, dispatch)
            .with_filters(Arc::new(filters))
            .with_retry(RetryPolicy::from(&config.retry))
            .with_backfill(BackfillSettings {
                limit: config.aggregator.backfill_limit,
                lookback: Duration::from_secs(config.aggregator.backfill_lookback_secs),
            }))
    }

    pub fn with_filters(mut self, filters: Arc<FilterRegistry>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_backfill(mut self, backfill: BackfillSettings) -> Self {
        self.backfill = backfill;
        self
    }

    /// Same context over a different store.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn dispatch(&self) -> &MessageDispatch {
        &self.dispatch
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn backfill(&self) -> BackfillSettings {
        self.backfill
    }
}
