//! Cache manager.

use super::backend::{CacheEntry, MemoryCache};
use crate::locks::KeyedLocks;
use crate::Error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache names available to callers; any other name is a configuration error.
    pub names: Vec<String>,
    /// Store a loader's `None` so the next lookup is a hit instead of another load.
    pub cache_null_values: bool,
    /// Serialize concurrent misses for the same key so the loader runs once.
    pub single_flight: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            names: vec![
                "transactions".to_string(),
                "transactionStats".to_string(),
                "transactionLocks".to_string(),
            ],
            cache_null_values: true,
            single_flight: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_null_values(mut self, enabled: bool) -> Self {
        self.cache_null_values = enabled;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub total: u64,
    /// Hits as a percentage of lookups, 0.0 before the first lookup.
    pub hit_rate: f64,
}

impl CacheStatistics {
    fn from_counts(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            total,
            hit_rate,
        }
    }
}

#[derive(Debug, Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStatistics {
        CacheStatistics::from_counts(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug)]
struct CacheSlot<V> {
    store: MemoryCache<V>,
    stats: AtomicStats,
}

/// Named caches with null protection, per-key atomic updates and hit/miss statistics.
///
/// `get_or_load` does not coordinate concurrent misses unless `single_flight` is on:
/// every caller that misses runs its own loader, and its write is not ordered against
/// `atomic_update*` on the same key.
#[derive(Debug)]
pub struct ResilientCache<V> {
    config: CacheConfig,
    caches: HashMap<String, CacheSlot<V>>,
    write_locks: KeyedLocks,
    load_locks: KeyedLocks,
}

impl<V: Clone> ResilientCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        let caches = config
            .names
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    CacheSlot {
                        store: MemoryCache::new(),
                        stats: AtomicStats::default(),
                    },
                )
            })
            .collect();
        info!(names = ?config.names, single_flight = config.single_flight, "cache initialized");
        Self {
            config,
            caches,
            write_locks: KeyedLocks::new(),
            load_locks: KeyedLocks::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Return the cached value for `key`, loading and storing it on a miss.
    ///
    /// A cached `None` is a hit. On a miss the loader runs once on the calling thread;
    /// its error is returned unchanged and nothing is stored.
    pub fn get_or_load<E, F>(&self, cache_name: &str, key: &str, loader: F) -> Result<Option<V>, E>
    where
        E: From<Error>,
        F: FnOnce() -> Result<Option<V>, E>,
    {
        let slot = self.slot(cache_name)?;

        if let Some(entry) = slot.store.get(key) {
            slot.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(cache = cache_name, key, "cache hit");
            return Ok(entry.value);
        }

        if !self.config.single_flight {
            return self.load(cache_name, slot, key, loader);
        }

        self.load_locks.with_lock(&lock_key(cache_name, key), || {
            // Another caller may have loaded the key while this one waited.
            if let Some(entry) = slot.store.get(key) {
                slot.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache = cache_name, key, "cache hit after waiting for load");
                return Ok(entry.value);
            }
            self.load(cache_name, slot, key, loader)
        })
    }

    fn load<E, F>(
        &self,
        cache_name: &str,
        slot: &CacheSlot<V>,
        key: &str,
        loader: F,
    ) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Result<Option<V>, E>,
    {
        slot.stats.misses.fetch_add(1, Ordering::Relaxed);
        debug!(cache = cache_name, key, "cache miss, loading value");

        let value = match loader() {
            Ok(value) => value,
            Err(err) => {
                warn!(cache = cache_name, key, "cache loader failed");
                return Err(err);
            }
        };

        if value.is_some() || self.config.cache_null_values {
            slot.store.put(key, CacheEntry::plain(value.clone()));
        }
        Ok(value)
    }

    /// Overwrite `key` under its write lock, dropping any stored version.
    pub fn atomic_update(&self, cache_name: &str, key: &str, value: V) -> Result<(), Error> {
        let slot = self.slot(cache_name)?;
        self.write_locks.with_lock(&lock_key(cache_name, key), || {
            slot.store.put(key, CacheEntry::plain(Some(value)));
        });
        debug!(cache = cache_name, key, "cache atomic update completed");
        Ok(())
    }

    /// Store `(value, version)` unless the stored version is `>= version`.
    ///
    /// Returns `false` for a stale write and leaves the entry untouched. An entry
    /// without a version accepts any versioned write.
    pub fn atomic_update_with_version(
        &self,
        cache_name: &str,
        key: &str,
        value: V,
        version: u64,
    ) -> Result<bool, Error> {
        let slot = self.slot(cache_name)?;
        let accepted = self.write_locks.with_lock(&lock_key(cache_name, key), || {
            if let Some(current) = slot.store.version(key) {
                if current >= version {
                    return false;
                }
            }
            slot.store.put(key, CacheEntry::versioned(value, version));
            true
        });
        if !accepted {
            debug!(cache = cache_name, key, version, "stale versioned update ignored");
        }
        Ok(accepted)
    }

    /// Evict `key` iff `condition` holds. A false condition never fails, even for an
    /// unknown cache.
    pub fn conditional_evict(
        &self,
        cache_name: &str,
        key: &str,
        condition: bool,
    ) -> Result<bool, Error> {
        if !condition {
            debug!(cache = cache_name, key, "cache eviction skipped");
            return Ok(false);
        }
        let removed = self.slot(cache_name)?.store.remove(key);
        debug!(cache = cache_name, key, removed, "cache eviction completed");
        Ok(removed)
    }

    /// Remove every key that fully matches the regular expression `pattern`.
    pub fn evict_by_pattern(&self, cache_name: &str, pattern: &str) -> Result<usize, Error> {
        let slot = self.slot(cache_name)?;
        let re = Regex::new(&format!("^(?:{})$", pattern))?;
        let removed = slot.store.remove_matching(&re);
        info!(cache = cache_name, pattern, removed, "cache pattern eviction completed");
        Ok(removed)
    }

    /// Read an entry without loading it or touching the statistics.
    pub fn get(&self, cache_name: &str, key: &str) -> Result<Option<CacheEntry<V>>, Error> {
        Ok(self.slot(cache_name)?.store.get(key))
    }

    pub fn len(&self, cache_name: &str) -> Result<usize, Error> {
        Ok(self.slot(cache_name)?.store.len())
    }

    pub fn clear(&self, cache_name: &str) -> Result<(), Error> {
        self.slot(cache_name)?.store.clear();
        info!(cache = cache_name, "cache cleared");
        Ok(())
    }

    /// One-line size summary, e.g. `Cache 'transactions' size: 3`.
    pub fn cache_stats(&self, cache_name: &str) -> String {
        match self.caches.get(cache_name) {
            Some(slot) => format!("Cache '{}' size: {}", cache_name, slot.store.len()),
            None => format!("Cache '{}' not found", cache_name),
        }
    }

    /// Best-effort hit/miss counters; unknown names report zeros.
    pub fn cache_statistics(&self, cache_name: &str) -> CacheStatistics {
        self.caches
            .get(cache_name)
            .map(|slot| slot.stats.to_stats())
            .unwrap_or_default()
    }

    pub fn all_cache_statistics(&self) -> BTreeMap<String, CacheStatistics> {
        self.caches
            .iter()
            .map(|(name, slot)| (name.clone(), slot.stats.to_stats()))
            .collect()
    }

    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop per-key write and load locks that nobody is holding.
    pub fn purge_idle_locks(&self) -> usize {
        self.write_locks.purge_idle() + self.load_locks.purge_idle()
    }

    fn slot(&self, cache_name: &str) -> Result<&CacheSlot<V>, Error> {
        self.caches.get(cache_name).ok_or_else(|| {
            warn!(cache = cache_name, "cache not found");
            Error::cache_not_found(cache_name)
        })
    }
}

// One lock per (cache, key) pair.
fn lock_key(cache_name: &str, key: &str) -> String {
    format!("{}\u{0}{}", cache_name, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn cache() -> ResilientCache<String> {
        ResilientCache::new(CacheConfig::new().with_names(["transactions", "userStats"]))
    }

    #[test]
    fn test_miss_then_hit() {
        let cache = cache();
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            Ok::<_, Error>(Some("txn-1".to_string()))
        };

        assert_eq!(cache.get_or_load("transactions", "1", load).unwrap(), Some("txn-1".into()));
        assert_eq!(cache.get_or_load("transactions", "1", load).unwrap(), Some("txn-1".into()));
        assert_eq!(calls.get(), 1);

        let stats = cache.cache_statistics("transactions");
        assert_eq!((stats.hits, stats.misses, stats.total), (1, 1, 2));
        assert_eq!(stats.hit_rate, 50.0);
    }

    #[test]
    fn test_null_result_is_cached() {
        let cache = cache();
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            Ok::<Option<String>, Error>(None)
        };

        assert_eq!(cache.get_or_load("transactions", "ghost", load).unwrap(), None);
        assert_eq!(cache.get_or_load("transactions", "ghost", load).unwrap(), None);
        assert_eq!(calls.get(), 1);
        assert_eq!(
            cache.get("transactions", "ghost").unwrap(),
            Some(CacheEntry::plain(None))
        );
    }

    #[test]
    fn test_null_result_not_cached_when_disabled() {
        let cache: ResilientCache<String> = ResilientCache::new(
            CacheConfig::new()
                .with_names(["transactions"])
                .with_null_values(false),
        );
        let calls = Cell::new(0);
        let load = || {
            calls.set(calls.get() + 1);
            Ok::<Option<String>, Error>(None)
        };
        cache.get_or_load("transactions", "ghost", load).unwrap();
        cache.get_or_load("transactions", "ghost", load).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_loader_error_passes_through_and_stores_nothing() {
        #[derive(Debug, PartialEq)]
        enum RepoError {
            NotFound(String),
            Cache(String),
        }
        impl From<Error> for RepoError {
            fn from(e: Error) -> Self {
                RepoError::Cache(e.to_string())
            }
        }

        let cache = cache();
        let result: Result<Option<String>, RepoError> =
            cache.get_or_load("transactions", "42", || Err(RepoError::NotFound("42".into())));
        assert_eq!(result, Err(RepoError::NotFound("42".into())));
        assert_eq!(cache.len("transactions").unwrap(), 0);
        assert_eq!(cache.cache_statistics("transactions").misses, 1);

        let unknown: Result<Option<String>, RepoError> =
            cache.get_or_load("nope", "42", || Ok(None));
        assert_eq!(unknown, Err(RepoError::Cache("Cache not found: nope".into())));
    }

    #[test]
    fn test_unknown_cache_fails_fast() {
        let cache = cache();
        let err = cache
            .get_or_load("orders", "1", || -> Result<Option<String>, Error> {
                panic!("loader must not run for an unknown cache")
            })
            .unwrap_err();
        assert!(matches!(err, Error::CacheNotFound { ref name } if name == "orders"));
        assert!(cache.atomic_update("orders", "1", "x".into()).is_err());
        assert!(cache.evict_by_pattern("orders", ".*").is_err());
    }

    #[test]
    fn test_atomic_update_overwrites_and_clears_version() {
        let cache = cache();
        cache.atomic_update_with_version("transactions", "1", "v5".into(), 5).unwrap();
        cache.atomic_update("transactions", "1", "plain".into()).unwrap();
        assert_eq!(
            cache.get("transactions", "1").unwrap(),
            Some(CacheEntry::plain(Some("plain".to_string())))
        );
        // With the version gone, an older version is accepted again.
        assert!(cache.atomic_update_with_version("transactions", "1", "v2".into(), 2).unwrap());
    }

    #[test]
    fn test_versioned_update_rejects_stale_writes() {
        let cache = cache();
        assert!(cache.atomic_update_with_version("transactions", "1", "v3".into(), 3).unwrap());
        assert!(!cache.atomic_update_with_version("transactions", "1", "v3b".into(), 3).unwrap());
        assert!(!cache.atomic_update_with_version("transactions", "1", "v1".into(), 1).unwrap());
        assert_eq!(
            cache.get("transactions", "1").unwrap(),
            Some(CacheEntry::versioned("v3".to_string(), 3))
        );

        assert!(cache.atomic_update_with_version("transactions", "1", "v4".into(), 4).unwrap());
        let entry = cache.get("transactions", "1").unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some("v4"));
        assert_eq!(entry.version, Some(4));
    }

    #[test]
    fn test_versioned_update_accepts_over_unversioned_entry() {
        let cache = cache();
        cache.atomic_update("transactions", "1", "plain".into()).unwrap();
        assert!(cache.atomic_update_with_version("transactions", "1", "v0".into(), 0).unwrap());
    }

    #[test]
    fn test_conditional_evict() {
        let cache = cache();
        cache.atomic_update("userStats", "u1", "stats".into()).unwrap();

        assert!(!cache.conditional_evict("userStats", "u1", false).unwrap());
        assert_eq!(cache.len("userStats").unwrap(), 1);
        // A false condition is a no-op even for an unknown cache.
        assert!(!cache.conditional_evict("nope", "u1", false).unwrap());

        assert!(cache.conditional_evict("userStats", "u1", true).unwrap());
        assert!(!cache.conditional_evict("userStats", "u1", true).unwrap());
        assert_eq!(cache.len("userStats").unwrap(), 0);
    }

    #[test]
    fn test_evict_by_pattern_uses_full_match() {
        let cache = cache();
        for key in ["stats_u1", "stats_u12", "profile_u1", "u1"] {
            cache.atomic_update("userStats", key, key.to_string()).unwrap();
        }

        assert_eq!(cache.evict_by_pattern("userStats", "stats_u1").unwrap(), 1);
        assert_eq!(cache.evict_by_pattern("userStats", ".*u1").unwrap(), 2);
        assert_eq!(
            cache.get("userStats", "stats_u12").unwrap().and_then(|e| e.value),
            Some("stats_u12".to_string())
        );
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let cache = cache();
        let err = cache.evict_by_pattern("userStats", "(unclosed").unwrap_err();
        assert!(matches!(err, Error::InvalidPattern(_)));
    }

    #[test]
    fn test_stats_strings_and_maps() {
        let cache = cache();
        cache.atomic_update("transactions", "1", "a".into()).unwrap();
        cache.atomic_update("transactions", "2", "b".into()).unwrap();
        assert_eq!(cache.cache_stats("transactions"), "Cache 'transactions' size: 2");
        assert_eq!(cache.cache_stats("orders"), "Cache 'orders' not found");

        for _ in 0..2 {
            cache.get_or_load("transactions", "1", || Ok::<_, Error>(None)).unwrap();
        }
        cache.get_or_load("transactions", "3", || Ok::<_, Error>(None)).unwrap();
        let stats = cache.cache_statistics("transactions");
        assert_eq!((stats.hits, stats.misses), (2, 1));
        assert!((stats.hit_rate - 66.666).abs() < 0.01);

        assert_eq!(cache.cache_statistics("orders"), CacheStatistics::default());
        let all = cache.all_cache_statistics();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["transactions", "userStats"]);
    }

    #[test]
    fn test_clear_and_purge_locks() {
        let cache = cache();
        cache.atomic_update("transactions", "1", "a".into()).unwrap();
        cache.atomic_update_with_version("transactions", "2", "b".into(), 1).unwrap();
        assert_eq!(cache.purge_idle_locks(), 2);
        cache.clear("transactions").unwrap();
        assert_eq!(cache.len("transactions").unwrap(), 0);
    }
}
