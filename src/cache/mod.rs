//! 弹性缓存模块：带空值保护、原子更新和命中统计的命名缓存。
//!
//! # Resilient Cache Module
//!
//! Named in-memory caches that sit in front of slow or failure-prone lookups.
//!
//! ## Overview
//!
//! A lookup goes through [`ResilientCache::get_or_load`]: a hit returns the stored
//! value, a miss runs the caller's loader and stores what it returns. A loader that
//! finds nothing still produces an entry (a null marker), so repeated lookups of a
//! missing record do not hammer the backing store.
//!
//! Writes that must not interleave go through `atomic_update` or
//! `atomic_update_with_version`, which serialize per `(cache, key)` pair. The versioned
//! form rejects writes whose version is not newer than the stored one.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ResilientCache`] | Named caches with get-or-load, atomic updates, eviction and stats |
//! | [`CacheConfig`] | Cache names, null-value caching and single-flight loading |
//! | [`CacheStatistics`] | Hit/miss counters and hit rate for one cache |
//! | [`MemoryCache`] | Concurrent store behind each named cache |
//! | [`CacheEntry`] | Stored value plus optional version |
//!
//! ## Example
//!
//! ```rust
//! use txguard::cache::{CacheConfig, ResilientCache};
//!
//! let cache: ResilientCache<String> = ResilientCache::new(CacheConfig::default());
//! let value = cache
//!     .get_or_load("transactions", "txn-1", || Ok::<_, txguard::Error>(Some("loaded".to_string())))
//!     .unwrap();
//! assert_eq!(value.as_deref(), Some("loaded"));
//! assert_eq!(cache.cache_statistics("transactions").misses, 1);
//! ```
//!
//! Entries never expire; there is no size bound or LRU policy. Use the eviction
//! operations or `clear` to drop data.

mod backend;
mod manager;

pub use backend::{CacheEntry, MemoryCache};
pub use manager::{CacheConfig, CacheStatistics, ResilientCache};
