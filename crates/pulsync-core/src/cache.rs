//! Caches keyed by remote string IDs.

use dashmap::DashMap;
use std::collections::HashSet;

/// A concurrent cache from remote ID to value.
///
/// Inserting an ID that is already present replaces the value. Entries are
/// never evicted; [`IdCache::clear`] drops everything at session teardown.
#[derive(Debug)]
pub struct IdCache<V> {
    entries: DashMap<String, V>,
}

impl<V: Clone> IdCache<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Get a clone of the cached value.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<V> {
        self.entries.get(id).map(|e| e.value().clone())
    }

    /// Check if an ID is cached.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Store a value, replacing any previous one.
    pub fn insert(&self, id: impl Into<String>, value: V) {
        self.entries.insert(id.into(), value);
    }

    /// Store many values.
    pub fn extend<I>(&self, items: I)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        for (id, value) in items {
            self.entries.insert(id, value);
        }
    }

    /// Filter `ids` down to the uncached ones, without duplicates.
    ///
    /// Order of first appearance is preserved.
    #[must_use]
    pub fn missing<'a, I>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        ids.into_iter()
            .filter(|id| !self.entries.contains_key(*id) && seen.insert(*id))
            .map(str::to_string)
            .collect()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<V: Clone> Default for IdCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
