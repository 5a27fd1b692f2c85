//! Monitoring snapshot across the limiter, breakers and caches.

use crate::cache::{CacheStatistics, ResilientCache};
use crate::resilience::{BreakerSnapshot, CircuitBreakers, RateLimiter, WindowSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time view for dashboards and admin endpoints.
///
/// Each section is read independently, so the snapshot is not atomic across components.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SignalsSnapshot {
    pub rate_limits: Vec<WindowSnapshot>,
    pub breakers: Vec<BreakerSnapshot>,
    pub caches: BTreeMap<String, CacheStatistics>,
}

impl SignalsSnapshot {
    pub fn collect<V: Clone>(
        limiter: &RateLimiter,
        breakers: &CircuitBreakers,
        cache: &ResilientCache<V>,
    ) -> Self {
        Self {
            rate_limits: limiter.snapshot(),
            breakers: breakers.snapshots(),
            caches: cache.all_cache_statistics(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Breakers that are currently rejecting or probing.
    pub fn unhealthy_breakers(&self) -> Vec<&str> {
        self.breakers
            .iter()
            .filter(|b| b.state != crate::resilience::BreakerState::Closed)
            .map(|b| b.name.as_str())
            .collect()
    }
}
