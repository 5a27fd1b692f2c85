//! 弹性模式模块：提供固定窗口限流器和按名称管理的熔断器。
//!
//! # Resilience Primitives Module
//!
//! Admission control for the calls a service makes or serves.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Fixed-window request counter per caller-chosen key |
//! | [`circuit_breaker`] | Three-state breaker registry keyed by breaker name |
//!
//! ## Rate Limiter
//!
//! Each key owns one window of `window_seconds`. The call that opens a window is always
//! admitted; later calls are admitted while the count stays within `limit`. Rejected
//! calls still count. An expired window is replaced, never slid.
//!
//! ```rust
//! use txguard::resilience::rate_limiter::RateLimiter;
//!
//! let limiter = RateLimiter::new();
//! assert!(limiter.allow("user:42", 2, 60));
//! assert!(limiter.allow("user:42", 2, 60));
//! assert!(!limiter.allow("user:42", 2, 60));
//! ```
//!
//! ## Circuit Breaker
//!
//! - **Closed**: calls pass; after `minimum_calls` the failure rate is checked on every failure
//! - **Open**: calls are rejected until `wait_duration` has elapsed
//! - **Half-Open**: trial calls pass; enough successes close it, any failure reopens it
//!
//! ```rust
//! use txguard::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitBreakers};
//!
//! let breakers = CircuitBreakers::new(CircuitBreakerConfig::new().with_minimum_calls(2));
//! if breakers.allow("createTransaction") {
//!     // Make the call...
//!     breakers.record_success("createTransaction");
//! }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{BreakerSnapshot, BreakerState, CircuitBreakerConfig, CircuitBreakers};
pub use rate_limiter::{RateLimiter, WindowSnapshot};
