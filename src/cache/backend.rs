//! In-memory store behind each named cache.

use dashmap::DashMap;
use regex::Regex;

/// A cached value plus the optional version used by optimistic updates.
///
/// `value: None` is a cached "no value" marker and counts as a hit; it is distinct
/// from a key that has no entry at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub value: Option<V>,
    pub version: Option<u64>,
}

impl<V> CacheEntry<V> {
    pub fn plain(value: Option<V>) -> Self {
        Self {
            value,
            version: None,
        }
    }

    pub fn versioned(value: V, version: u64) -> Self {
        Self {
            value: Some(value),
            version: Some(version),
        }
    }
}

/// Concurrent key/value store without expiry or eviction policy.
///
/// Reads and single writes never block each other beyond a shard lock; callers that
/// need read-modify-write ordering serialize through their own per-key locks.
#[derive(Debug)]
pub struct MemoryCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
}

impl<V: Clone> MemoryCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn version(&self, key: &str) -> Option<u64> {
        self.entries.get(key).and_then(|e| e.value().version)
    }

    pub fn put(&self, key: &str, entry: CacheEntry<V>) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Linear scan removing every key the pattern matches; returns the count removed.
    pub fn remove_matching(&self, pattern: &Regex) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.is_match(key));
        before.saturating_sub(self.entries.len())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone> Default for MemoryCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_marker_is_an_entry() {
        let cache: MemoryCache<String> = MemoryCache::new();
        cache.put("missing-txn", CacheEntry::plain(None));
        assert!(cache.contains("missing-txn"));
        assert_eq!(cache.get("missing-txn"), Some(CacheEntry::plain(None)));
        assert_eq!(cache.get("absent"), None);
    }

    #[test]
    fn test_version_lookup() {
        let cache = MemoryCache::new();
        cache.put("a", CacheEntry::versioned(1u32, 7));
        cache.put("b", CacheEntry::plain(Some(2u32)));
        assert_eq!(cache.version("a"), Some(7));
        assert_eq!(cache.version("b"), None);
        assert_eq!(cache.version("c"), None);
    }

    #[test]
    fn test_remove_matching_counts_removed() {
        let cache = MemoryCache::new();
        for key in ["txn_1", "txn_2", "all_0_10"] {
            cache.put(key, CacheEntry::plain(Some(0u8)));
        }
        let re = Regex::new("^(?:txn_.*)$").unwrap();
        assert_eq!(cache.remove_matching(&re), 2);
        assert_eq!(cache.keys(), vec!["all_0_10".to_string()]);
    }
}
