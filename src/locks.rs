//! Per-key mutual exclusion shared by the rate limiter and the cache write paths.

use dashmap::DashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Lazily populated map of one mutex per key.
///
/// The first caller to ask for a key installs its lock; every later caller gets a
/// clone of the same `Arc`. Entries are only removed when idle (no outstanding
/// clone), so a thread that already holds or awaits a key's lock never races a
/// freshly installed replacement.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it on first use.
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(key) {
            return Arc::clone(existing.value());
        }
        // The shard guard from `entry` is released before the caller locks.
        Arc::clone(
            self.locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Runs `f` while holding the lock for `key`.
    ///
    /// The guard is dropped on every exit path, including a panic inside `f`; a
    /// poisoned lock is recovered since it protects no data of its own.
    pub fn with_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Removes the lock for `key` if nobody holds a clone of it.
    pub fn remove_idle(&self, key: &str) -> bool {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Drops every idle lock and returns how many were removed.
    pub fn purge_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.locks.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
