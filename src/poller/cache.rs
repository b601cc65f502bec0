//! Identity cache — the set of item ids the relay has already handled.

use std::collections::HashSet;

use crate::feed::ItemId;

/// Process-lifetime set of seen item ids.
///
/// Owned by exactly one poll cycle, so it needs no locking. It only ever
/// grows; the store remains the durable record of what was seen.
#[derive(Debug, Default)]
pub struct IdentityCache {
    seen: HashSet<ItemId>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.seen.contains(&id)
    }

    /// Mark `id` as seen. Recording an id twice has no further effect.
    pub fn record(&mut self, id: ItemId) {
        self.seen.insert(id);
    }

    /// Bulk-insert ids, returning how many were not already present.
    pub fn seed<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ItemId>,
    {
        let before = self.seen.len();
        self.seen.extend(ids);
        self.seen.len() - before
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_contains() {
        let mut cache = IdentityCache::new();
        assert!(!cache.contains(ItemId(1)));
        cache.record(ItemId(1));
        assert!(cache.contains(ItemId(1)));
    }

    #[test]
    fn record_is_idempotent() {
        let mut cache = IdentityCache::new();
        cache.record(ItemId(7));
        cache.record(ItemId(7));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn seed_counts_new_ids() {
        let mut cache = IdentityCache::new();
        cache.record(ItemId(2));
        let added = cache.seed([1, 2, 3].map(ItemId));
        assert_eq!(added, 2);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn starts_empty() {
        let cache = IdentityCache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.len(), 0);
    }
}
