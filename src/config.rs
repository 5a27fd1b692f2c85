//! Resilience configuration
//!
//! Loads limiter rules, breaker settings and cache names from YAML so a deployment
//! can tune admission without recompiling.
//!
//! ```yaml
//! rate_limits:
//!   create_per_subject:
//!     key: "$subject"
//!     limit: 100
//!     window_seconds: 60
//! breakers:
//!   createTransaction:
//!     failure_rate_threshold: 50
//!     minimum_calls: 10
//!     wait_duration_secs: 30
//! cache:
//!   names: [transactions, transactionStats]
//! ```

use crate::cache::{CacheConfig, ResilientCache};
use crate::clock::Clock;
use crate::interceptors::RateLimitRule;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakers, RateLimiter};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Named limiter rules that guard policies can refer to.
    pub rate_limits: BTreeMap<String, RateLimitRule>,
    /// Settings for breakers by name; unlisted names use `default_breaker`.
    pub breakers: BTreeMap<String, CircuitBreakerConfig>,
    pub default_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
}

impl ResilienceConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ResilienceConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&content).map_err(|e| match e {
            Error::Configuration { message, context } => Error::configuration_with_context(
                message,
                context.with_source(path.display().to_string()),
            ),
            other => other,
        })?;
        info!(path = %path.display(), rules = config.rate_limits.len(), breakers = config.breakers.len(), "resilience config loaded");
        Ok(config)
    }

    /// Reject values that would make a component misbehave silently.
    pub fn validate(&self) -> Result<()> {
        for (name, rule) in &self.rate_limits {
            if rule.limit == 0 {
                return Err(invalid(
                    format!("rate_limits.{}.limit", name),
                    "limit must be greater than zero",
                    "got 0",
                ));
            }
            if rule.window_seconds == 0 {
                return Err(invalid(
                    format!("rate_limits.{}.window_seconds", name),
                    "window_seconds must be greater than zero",
                    "got 0",
                ));
            }
        }

        validate_breaker("default_breaker", &self.default_breaker)?;
        for (name, breaker) in &self.breakers {
            validate_breaker(&format!("breakers.{}", name), breaker)?;
        }

        if self.cache.names.is_empty() {
            return Err(invalid(
                "cache.names",
                "at least one cache name is required",
                "got an empty list",
            ));
        }
        if let Some(blank) = self.cache.names.iter().position(|n| n.trim().is_empty()) {
            return Err(invalid(
                format!("cache.names[{}]", blank),
                "cache names must not be blank",
                "got an empty name",
            ));
        }
        Ok(())
    }

    pub fn rule(&self, name: &str) -> Option<&RateLimitRule> {
        self.rate_limits.get(name)
    }

    /// Breaker registry with every listed breaker pre-registered.
    pub fn build_breakers(&self, clock: Arc<dyn Clock>) -> CircuitBreakers {
        let breakers = CircuitBreakers::with_clock(self.default_breaker.clone(), clock);
        for (name, config) in &self.breakers {
            breakers.configure(name.clone(), config.clone());
        }
        breakers
    }

    pub fn build_limiter(&self, clock: Arc<dyn Clock>) -> RateLimiter {
        RateLimiter::with_clock(clock)
    }

    pub fn build_cache<V: Clone>(&self) -> ResilientCache<V> {
        ResilientCache::new(self.cache.clone())
    }
}

fn validate_breaker(path: &str, config: &CircuitBreakerConfig) -> Result<()> {
    let threshold = config.failure_rate_threshold;
    if !(threshold > 0.0 && threshold <= 100.0) {
        return Err(invalid(
            format!("{}.failure_rate_threshold", path),
            "failure_rate_threshold must be in (0, 100]",
            format!("got {}", threshold),
        ));
    }
    if config.minimum_calls == 0 {
        return Err(invalid(
            format!("{}.minimum_calls", path),
            "minimum_calls must be greater than zero",
            "got 0",
        ));
    }
    Ok(())
}

fn invalid(field: impl Into<String>, message: &str, details: impl Into<String>) -> Error {
    Error::configuration_with_context(
        message,
        ErrorContext::new()
            .with_field_path(field)
            .with_details(details),
    )
}

/// Serde adapter storing a `Duration` as whole seconds.
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
