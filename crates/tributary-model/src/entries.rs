// SPDX-FileCopyrightText: 2026 Tributary Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamp-ordered entry collection with bounded size and change tracking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::item::ItemRef;

type SortKey = (Option<DateTime<Utc>>, String);

fn sort_key(item: &ItemRef) -> SortKey {
    (item.timestamp, item.item_id.clone())
}

/// Pending writes accumulated since the last save.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    /// Entries inserted or replaced.
    pub updated: Vec<ItemRef>,
    /// Previously saved entries that were removed.
    pub removed: Vec<ItemRef>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

/// The in-memory entries of a bucket, keyed by `item_id`.
///
/// Iteration is in ascending timestamp order. With a `maxlen`, inserting past
/// capacity evicts the oldest entries. Every insert, replace and delete
/// (evictions included) lands in the pending [`ChangeSet`]; entries loaded
/// from the store via [`EntryMap::load`] do not.
#[derive(Debug, Clone, Default)]
pub struct EntryMap {
    entries: HashMap<String, ItemRef>,
    order: BTreeSet<SortKey>,
    maxlen: Option<usize>,
    updated: BTreeMap<String, ItemRef>,
    removed: BTreeMap<String, ItemRef>,
}

impl EntryMap {
    pub fn new(maxlen: Option<usize>) -> Self {
        Self {
            maxlen,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, item_id: &str) -> Option<&ItemRef> {
        self.entries.get(item_id)
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.entries.contains_key(item_id)
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ItemRef> {
        self.order.iter().filter_map(|(_, id)| self.entries.get(id))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|(_, id)| id.as_str())
    }

    pub fn maxlen(&self) -> Option<usize> {
        self.maxlen
    }

    /// Change the capacity; shrinking evicts immediately.
    pub fn set_maxlen(&mut self, maxlen: Option<usize>) {
        self.maxlen = maxlen;
        self.evict();
    }

    /// Insert or replace an entry and record it as updated.
    pub fn insert(&mut self, item: ItemRef) {
        self.mark_updated(item.clone());
        self.put(item);
        self.evict();
    }

    /// Insert a stored entry without recording a change.
    pub fn load(&mut self, item: ItemRef) {
        self.put(item);
    }

    /// Remove an entry and record the removal.
    pub fn remove(&mut self, item_id: &str) -> Option<ItemRef> {
        let item = self.take(item_id)?;
        self.mark_removed(item.clone());
        Some(item)
    }

    /// Take an entry out of the pending removals, if it is there.
    pub fn take_removed(&mut self, item_id: &str) -> Option<ItemRef> {
        self.removed.remove(item_id)
    }

    /// Replace an entry with an already-saved copy, dropping its pending changes.
    pub fn clobber(&mut self, item: ItemRef) {
        self.updated.remove(&item.item_id);
        self.removed.remove(&item.item_id);
        self.put(item);
    }

    /// Record a stored revision for an entry after a successful save.
    pub fn set_rev(&mut self, item_id: &str, rev: u64) {
        if let Some(item) = self.entries.get_mut(item_id) {
            item.set_rev(Some(rev));
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.updated.is_empty() || !self.removed.is_empty()
    }

    /// Drain the pending changes.
    pub fn take_dirty(&mut self) -> ChangeSet {
        ChangeSet {
            updated: std::mem::take(&mut self.updated).into_values().collect(),
            removed: std::mem::take(&mut self.removed).into_values().collect(),
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            self.remove(&id);
        }
    }

    fn put(&mut self, item: ItemRef) {
        if let Some(previous) = self.entries.get(&item.item_id) {
            self.order.remove(&sort_key(previous));
        }
        self.order.insert(sort_key(&item));
        self.entries.insert(item.item_id.clone(), item);
    }

    fn take(&mut self, item_id: &str) -> Option<ItemRef> {
        let item = self.entries.remove(item_id)?;
        self.order.remove(&sort_key(&item));
        Some(item)
    }

    fn evict(&mut self) {
        let Some(maxlen) = self.maxlen else {
            return;
        };
        while self.entries.len() > maxlen {
            let Some((_, oldest)) = self.order.first().cloned() else {
                break;
            };
            self.remove(&oldest);
        }
    }

    fn mark_updated(&mut self, item: ItemRef) {
        self.removed.remove(&item.item_id);
        self.updated.insert(item.item_id.clone(), item);
    }

    fn mark_removed(&mut self, item: ItemRef) {
        match self.updated.remove(&item.item_id) {
            // Never-saved entries vanish without a delete.
            Some(pending) if pending.rev().is_none() => {}
            _ => {
                self.removed.insert(item.item_id.clone(), item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn item(id: &str, secs: i64) -> ItemRef {
        let mut item = ItemRef::new("b", id);
        item.timestamp = Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs));
        item
    }

    fn saved(id: &str, secs: i64) -> ItemRef {
        let mut item = item(id, secs);
        item.set_rev(Some(1));
        item
    }

    #[test]
    fn iterates_oldest_first() {
        let mut map = EntryMap::new(None);
        map.insert(item("c", 30));
        map.insert(item("a", 10));
        map.insert(item("b", 20));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn replace_moves_entry() {
        let mut map = EntryMap::new(None);
        map.insert(item("a", 10));
        map.insert(item("b", 20));
        map.insert(item("a", 30));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn lowering_maxlen_evicts_oldest() {
        let mut map = EntryMap::new(None);
        for i in 0..5 {
            map.load(saved(&format!("i{i}"), i));
        }
        map.set_maxlen(Some(2));
        let keys: Vec<_> = map.keys().collect();
        assert_eq!(keys, vec!["i3", "i4"]);
        let dirty = map.take_dirty();
        assert_eq!(dirty.removed.len(), 3);
        assert!(dirty.updated.is_empty());

        map.set_maxlen(Some(10));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn removing_unsaved_insert_leaves_no_trace() {
        let mut map = EntryMap::new(None);
        map.insert(item("a", 1));
        map.remove("a");
        assert!(!map.is_dirty());
    }

    #[test]
    fn removing_saved_entry_records_delete() {
        let mut map = EntryMap::new(None);
        map.load(saved("a", 1));
        let mut newer = saved("a", 2);
        newer.title = Some("t".into());
        map.insert(newer);
        map.remove("a");
        let dirty = map.take_dirty();
        assert!(dirty.updated.is_empty());
        assert_eq!(dirty.removed.len(), 1);
        assert!(!map.is_dirty());
    }

    #[test]
    fn reinsert_cancels_removal() {
        let mut map = EntryMap::new(None);
        map.load(saved("a", 1));
        map.remove("a");
        let revived = map.take_removed("a").unwrap();
        map.insert(revived);
        let dirty = map.take_dirty();
        assert_eq!(dirty.updated.len(), 1);
        assert_eq!(dirty.updated[0].rev(), Some(1));
        assert!(dirty.removed.is_empty());
    }

    #[test]
    fn clobber_drops_pending_changes() {
        let mut map = EntryMap::new(None);
        map.insert(item("a", 1));
        map.clobber(saved("a", 2));
        assert!(!map.is_dirty());
        assert_eq!(map.get("a").unwrap().rev(), Some(1));
    }

    proptest! {
        #[test]
        fn maxlen_keeps_newest(times in proptest::collection::hash_set(0i64..10_000, 1..40), k in 1usize..10) {
            let mut map = EntryMap::new(Some(k));
            for t in &times {
                map.insert(item(&format!("i{t}"), *t));
            }
            let mut sorted: Vec<i64> = times.iter().copied().collect();
            sorted.sort_unstable();
            let expected: Vec<String> = sorted
                .iter()
                .rev()
                .take(k)
                .rev()
                .map(|t| format!("i{t}"))
                .collect();
            let kept: Vec<String> = map.keys().map(str::to_string).collect();
            prop_assert_eq!(kept, expected);
        }
    }
}
