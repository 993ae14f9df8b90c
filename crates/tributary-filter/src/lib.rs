// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Item filters, accept/reject chains, and the filter registry.
//!
//! A composite stores its filters as [`FilterSpec`] records. The
//! [`FilterRegistry`] turns those records into a [`FilterChain`], which
//! decides per item whether it is accepted into the composite or diverted to
//! the rejected bucket. Filters look at the trimmed item reference first and
//! only load the full item when a matcher needs its details.

pub mod chain;
pub mod filter;
pub mod matchers;
pub mod pattern;
pub mod registry;

pub use chain::{FilterAction, FilterChain, FilterSpec};
pub use filter::{And, FilterInput, ItemFilter, ItemLoader, MatchAll, MatchNone, Negation, Or};
pub use matchers::{FieldMatch, FieldSource};
pub use pattern::{MatchType, Pattern, canonical_url};
pub use registry::{FilterEntry, FilterFactory, FilterRegistry, FilterStatus};
