//! Concurrent map of immutable snapshots with compare-and-swap updates.
//!
//! Values are stored behind `Arc` and never mutated. Writers read a snapshot,
//! derive a new value from it and swap it in only if the entry still holds
//! the very same `Arc` (pointer identity). The lock is held for the lookup or
//! the swap itself, never while a new value is being computed.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

pub(crate) struct CasMap<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
}

impl<K, V> CasMap<K, V>
where
    K: Eq + Hash + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.entries.read().get(key).cloned()
    }

    /// Current snapshot for `key`, inserting `init()` if there is none.
    ///
    /// The flag is `true` when this call inserted the value.
    pub(crate) fn get_or_insert_with(&self, key: &K, init: impl FnOnce() -> V) -> (Arc<V>, bool) {
        if let Some(current) = self.get(key) {
            return (current, false);
        }
        let mut entries = self.entries.write();
        if let Some(current) = entries.get(key) {
            return (Arc::clone(current), false);
        }
        let inserted = Arc::new(init());
        entries.insert(key.clone(), Arc::clone(&inserted));
        (inserted, true)
    }

    /// Replaces the entry with `new` if it still holds `current`.
    pub(crate) fn compare_and_swap(&self, key: &K, current: &Arc<V>, new: V) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(key) {
            Some(slot) if Arc::ptr_eq(slot, current) => {
                *slot = Arc::new(new);
                true
            }
            _ => false,
        }
    }

    /// Removes the entry if it still holds `current`.
    pub(crate) fn compare_and_remove(&self, key: &K, current: &Arc<V>) -> bool {
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(slot) if Arc::ptr_eq(slot, current) => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time copy of every entry.
    pub(crate) fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        self.entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), Arc::clone(value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_reports_insertion_once() {
        let map = CasMap::new();
        let (first, inserted) = map.get_or_insert_with(&"a", || 1);
        assert!(inserted);
        let (second, inserted) = map.get_or_insert_with(&"a", || 2);
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second, 1);
    }

    #[test]
    fn swap_succeeds_only_against_current_snapshot() {
        let map = CasMap::new();
        let (original, _) = map.get_or_insert_with(&"a", || 1);

        assert!(map.compare_and_swap(&"a", &original, 2));
        assert!(!map.compare_and_swap(&"a", &original, 3));
        assert_eq!(map.get("a").map(|value| *value), Some(2));
    }

    #[test]
    fn equal_values_are_not_the_same_snapshot() {
        let map = CasMap::new();
        let (original, _) = map.get_or_insert_with(&"a", || 1);
        assert!(map.compare_and_swap(&"a", &original, 1));
        assert!(!map.compare_and_swap(&"a", &original, 5));
    }

    #[test]
    fn remove_requires_current_snapshot() {
        let map = CasMap::new();
        let (original, _) = map.get_or_insert_with(&"a", || 1);
        let stale = Arc::new(1);

        assert!(!map.compare_and_remove(&"a", &stale));
        assert!(map.compare_and_remove(&"a", &original));
        assert!(map.get("a").is_none());
        assert!(!map.compare_and_swap(&"a", &original, 2));
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let map = CasMap::new();
        map.get_or_insert_with(&"a", || 1);
        let snapshot = map.snapshot();
        map.get_or_insert_with(&"b", || 2);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(map.snapshot().len(), 2);
    }
}
