use crate::clock::{Clock, SystemClock};
use crate::locks::KeyedLocks;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub key: String,
    /// Epoch second at which the window opened.
    pub window_start: u64,
    pub count: u32,
}

#[derive(Debug)]
struct RateWindow {
    window_start: u64,
    count: AtomicU32,
}

impl RateWindow {
    fn new(window_start: u64) -> Self {
        Self {
            window_start,
            count: AtomicU32::new(1),
        }
    }

    fn is_expired(&self, now: u64, window_seconds: u64) -> bool {
        now.saturating_sub(self.window_start) >= window_seconds
    }

    /// Only called with the key's lock held, so load+store cannot lose an update.
    fn increment(&self) -> u32 {
        let next = self.count.load(Ordering::Acquire).saturating_add(1);
        self.count.store(next, Ordering::Release);
        next
    }
}

/// Fixed-window rate limiter keyed by caller-chosen strings.
///
/// - One window per key, replaced wholesale once it has expired
/// - The call that overflows the limit is rejected but still counted
/// - Limits and window lengths are supplied per call, nothing is configured up front
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: DashMap<String, RateWindow>,
    locks: KeyedLocks,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: DashMap::new(),
            locks: KeyedLocks::new(),
        }
    }

    /// Admit or reject one call for `key`.
    ///
    /// A missing or expired window is replaced by a fresh one with a count of 1 and the
    /// call is admitted regardless of `limit`. Otherwise the count is incremented and
    /// the call is admitted iff the new count is `<= limit`.
    pub fn allow(&self, key: &str, limit: u32, window_seconds: u64) -> bool {
        let now = self.clock.now_secs();
        self.locks.with_lock(key, || {
            // The shard guard from `get` must be gone before `insert` touches the same shard.
            let live_count = self
                .windows
                .get(key)
                .filter(|w| !w.is_expired(now, window_seconds))
                .map(|w| w.increment());

            match live_count {
                Some(count) => {
                    let allowed = count <= limit;
                    if !allowed {
                        debug!(key, count, limit, "rate limit exceeded");
                    }
                    allowed
                }
                None => {
                    self.windows.insert(key.to_string(), RateWindow::new(now));
                    debug!(key, window_start = now, window_seconds, "rate window opened");
                    true
                }
            }
        })
    }

    /// Calls counted in the key's current window, expired or not; 0 for unknown keys.
    pub fn current_count(&self, key: &str) -> u32 {
        self.windows
            .get(key)
            .map(|w| w.count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Forget the key's window and its lock; the next call behaves like a first call.
    pub fn reset(&self, key: &str) {
        self.locks.with_lock(key, || {
            self.windows.remove(key);
        });
        self.locks.remove_idle(key);
        info!(key, "rate limiter reset");
    }

    /// Drop every window. Locks that are currently held stay installed for their holders.
    pub fn clear(&self) {
        self.windows.clear();
        self.locks.purge_idle();
        info!("rate limiter cleared");
    }

    /// Remove windows that have expired relative to `window_seconds`, plus idle locks.
    ///
    /// Returns the number of windows removed. Live windows are left untouched.
    pub fn sweep_expired(&self, window_seconds: u64) -> usize {
        let now = self.clock.now_secs();
        let keys: Vec<String> = self.windows.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for key in keys {
            let evicted = self.locks.with_lock(&key, || {
                self.windows
                    .remove_if(&key, |_, w| w.is_expired(now, window_seconds))
                    .is_some()
            });
            if evicted {
                removed += 1;
            }
        }
        let purged_locks = self.locks.purge_idle();
        debug!(removed, purged_locks, "rate limiter sweep finished");
        removed
    }

    /// All live windows, sorted by key.
    pub fn snapshot(&self) -> Vec<WindowSnapshot> {
        let mut windows: Vec<WindowSnapshot> = self
            .windows
            .iter()
            .map(|e| WindowSnapshot {
                key: e.key().clone(),
                window_start: e.value().window_start,
                count: e.value().count.load(Ordering::Acquire),
            })
            .collect();
        windows.sort_by(|a, b| a.key.cmp(&b.key));
        windows
    }

    pub fn active_keys(&self) -> usize {
        self.windows.len()
    }

    /// Number of per-key locks currently installed.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
