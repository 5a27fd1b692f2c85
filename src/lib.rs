//! # txguard
//!
//! 交易 API 的弹性层：固定窗口限流、熔断器与带空值保护的缓存。
//!
//! Resilience layer for a transaction API. It keeps a service responsive when clients
//! send too much traffic or a dependency starts failing.
//!
//! ## Overview
//!
//! Three in-process components share nothing but a clock:
//!
//! - **Rate limiting**: fixed windows per key, see [`resilience::rate_limiter`]
//! - **Circuit breaking**: named three-state breakers, see [`resilience::circuit_breaker`]
//! - **Caching**: named caches with get-or-load, null protection and atomic updates, see [`cache`]
//!
//! [`interceptors::Guard`] chains the limiter and a breaker around a business operation,
//! and [`signals::SignalsSnapshot`] reports the state of all three for monitoring.
//!
//! State lives in this process only; there is no coordination between instances.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use txguard::interceptors::{BreakerRule, CallContext, Guard, GuardPolicy, RateLimitRule};
//! use txguard::resilience::{CircuitBreakerConfig, CircuitBreakers, RateLimiter};
//!
//! let guard = Guard::new(
//!     Arc::new(RateLimiter::new()),
//!     Arc::new(CircuitBreakers::new(CircuitBreakerConfig::default())),
//! );
//! let policy = GuardPolicy::new()
//!     .with_rate_limit(RateLimitRule::new(100, 60).per_subject())
//!     .with_breaker(BreakerRule::new("createTransaction"));
//!
//! let ctx = CallContext::new("createTransaction").with_subject("acct-1");
//! let id = guard.call(&ctx, &policy, || Ok::<_, txguard::Error>(17)).unwrap();
//! assert_eq!(id, 17);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Fixed-window rate limiter and circuit breaker registry |
//! | [`cache`] | Named caches with null protection, versioned updates and statistics |
//! | [`interceptors`] | Guard running limiter and breaker checks around an operation |
//! | [`config`] | YAML configuration for rules, breakers and caches |
//! | [`signals`] | Serializable monitoring snapshot |
//! | [`clock`] | Time source, with a manual clock for tests |
//! | [`locks`] | Per-key mutex map used by the limiter and cache |

pub mod cache;
pub mod clock;
pub mod config;
pub mod interceptors;
pub mod locks;
pub mod resilience;
pub mod signals;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheStatistics, ResilientCache};
pub use config::ResilienceConfig;
pub use interceptors::{BreakerRule, CallContext, Guard, GuardPolicy, KeySource, RateLimitRule};
pub use resilience::{BreakerState, CircuitBreakerConfig, CircuitBreakers, RateLimiter};
pub use signals::SignalsSnapshot;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
