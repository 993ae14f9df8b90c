// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Order-preserving index key encoding.
//!
//! Index keys are plain strings compared bytewise. Compound keys join their
//! parts with a unit separator that sorts below every printable character, so
//! `["a", "b"]` sorts before `["ab"]`. Timestamps use a fixed-width UTC form
//! so that lexical order equals chronological order.

use chrono::{DateTime, Utc};

/// Separator between compound key parts.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Sorts after any key part.
pub const KEY_HIGH: char = '\u{10FFFF}';

/// Join key parts into one compound key.
pub fn compound_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

/// Fixed-width key form of a timestamp.
pub fn time_key(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Key form of a boolean; `false` sorts first.
pub fn bool_key(b: bool) -> &'static str {
    if b { "1" } else { "0" }
}

/// An inclusive `[start, end]` key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: String,
    pub end: String,
}

impl KeyRange {
    /// Every compound key that begins with all of `parts`.
    pub fn prefix(parts: &[&str]) -> Self {
        let mut start = compound_key(parts);
        start.push(KEY_SEPARATOR);
        let mut end = start.clone();
        end.push(KEY_HIGH);
        Self { start, end }
    }

    /// Compound keys from `prefix + [low]` through `prefix + [high]`.
    pub fn between(prefix: &[&str], low: &str, high: &str) -> Self {
        let mut start_parts: Vec<&str> = prefix.to_vec();
        start_parts.push(low);
        let mut end_parts: Vec<&str> = prefix.to_vec();
        end_parts.push(high);
        let mut end = compound_key(&end_parts);
        end.push(KEY_SEPARATOR);
        end.push(KEY_HIGH);
        Self {
            start: compound_key(&start_parts),
            end,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.start.as_str() && key <= self.end.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn compound_keys_sort_by_first_part() {
        let a = compound_key(&["a", "zzz"]);
        let ab = compound_key(&["ab", "000"]);
        assert!(a < ab);
    }

    #[test]
    fn prefix_range_covers_children_only() {
        let range = KeyRange::prefix(&["bucket"]);
        assert!(range.contains(&compound_key(&["bucket", "2026"])));
        assert!(!range.contains(&compound_key(&["bucket2", "2026"])));
        assert!(!range.contains("bucket"));
    }

    #[test]
    fn between_is_inclusive_of_both_bounds() {
        let low = time_key(&Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let high = time_key(&Utc.with_ymd_and_hms(2026, 1, 2, 0, 0, 0).unwrap());
        let range = KeyRange::between(&["b"], &low, &high);
        assert!(range.contains(&compound_key(&["b", &low])));
        assert!(range.contains(&compound_key(&["b", &high])));
        assert!(range.contains(&compound_key(&["b", &high, "doc"])));
    }

    #[test]
    fn bool_keys_put_false_first() {
        assert!(bool_key(false) < bool_key(true));
    }

    proptest! {
        #[test]
        fn time_keys_order_chronologically(a in 0i64..4_000_000_000, b in 0i64..4_000_000_000) {
            let ta = Utc.timestamp_opt(a, 0).unwrap();
            let tb = Utc.timestamp_opt(b, 0).unwrap();
            prop_assert_eq!(ta.cmp(&tb), time_key(&ta).cmp(&time_key(&tb)));
        }
    }
}
