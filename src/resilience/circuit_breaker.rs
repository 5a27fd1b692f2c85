use crate::clock::{Clock, SystemClock};
use crate::config::secs;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Normal operation, calls pass through.
    Closed,
    /// Failure rate tripped the breaker, calls are rejected.
    Open,
    /// Cool-down elapsed, trial calls are admitted.
    HalfOpen,
}

impl BreakerState {
    const CLOSED: u8 = 0;
    const OPEN: u8 = 1;
    const HALF_OPEN: u8 = 2;

    fn from_u8(raw: u8) -> Self {
        match raw {
            Self::OPEN => BreakerState::Open,
            Self::HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub success_count: u32,
    pub failure_count: u32,
    pub total_count: u32,
    /// Failure percentage over the counted calls, 0.0 when nothing was counted.
    pub failure_rate: f64,
    pub last_failure_secs: Option<u64>,
    pub opened_at_secs: Option<u64>,
    /// Seconds left before an open breaker admits a trial call.
    pub open_remaining_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0-100] at or above which a closed breaker opens.
    pub failure_rate_threshold: f64,
    /// Calls that must be counted before the failure rate is evaluated.
    pub minimum_calls: u32,
    /// Time an open breaker waits before admitting trial calls.
    #[serde(rename = "wait_duration_secs", with = "secs")]
    pub wait_duration: Duration,
    /// Accepted and reported, but counts are cumulative since the last reset and are
    /// not aged out by this window.
    #[serde(rename = "sliding_window_secs", with = "secs")]
    pub sliding_window: Duration,
    /// Admit a single in-flight trial call while half-open instead of all callers.
    pub single_trial: bool,
    /// Message carried by `CircuitBreakerOpen` rejections.
    pub message: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            minimum_calls: 10,
            wait_duration: Duration::from_secs(30),
            sliding_window: Duration::from_secs(60),
            single_trial: false,
            message: "Service temporarily unavailable. Please try again later.".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    pub fn with_minimum_calls(mut self, calls: u32) -> Self {
        self.minimum_calls = calls;
        self
    }

    pub fn with_wait_duration(mut self, wait: Duration) -> Self {
        self.wait_duration = wait;
        self
    }

    pub fn with_sliding_window(mut self, window: Duration) -> Self {
        self.sliding_window = window;
        self
    }

    pub fn with_single_trial(mut self, single_trial: bool) -> Self {
        self.single_trial = single_trial;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

/// Per-name breaker state.
///
/// Lock-free: the state field and counters are independent atomics, so two threads
/// racing `record_failure` near the threshold may both trip the breaker. Both write
/// the same target state, which makes the race benign though not linearizable.
#[derive(Debug)]
struct BreakerRecord {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    success_count: AtomicU32,
    failure_count: AtomicU32,
    total_count: AtomicU32,
    last_failure_secs: AtomicU64,
    opened_at_secs: AtomicU64,
    trial_taken: AtomicBool,
}

impl BreakerRecord {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(BreakerState::CLOSED),
            success_count: AtomicU32::new(0),
            failure_count: AtomicU32::new(0),
            total_count: AtomicU32::new(0),
            last_failure_secs: AtomicU64::new(0),
            opened_at_secs: AtomicU64::new(0),
            trial_taken: AtomicBool::new(false),
        }
    }

    fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn allow(&self, name: &str, now: u64) -> bool {
        match self.state() {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let opened_at = self.opened_at_secs.load(Ordering::SeqCst);
                if now.saturating_sub(opened_at) < self.config.wait_duration.as_secs() {
                    return false;
                }
                // Losers of this exchange already observe HALF_OPEN.
                if self
                    .state
                    .compare_exchange(
                        BreakerState::OPEN,
                        BreakerState::HALF_OPEN,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
                {
                    info!(breaker = name, "circuit breaker half-open");
                }
                self.admit_trial()
            }
            BreakerState::HalfOpen => self.admit_trial(),
        }
    }

    fn admit_trial(&self) -> bool {
        !self.config.single_trial
            || self
                .trial_taken
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    fn record_success(&self, name: &str) {
        self.total_count.fetch_add(1, Ordering::SeqCst);
        self.success_count.fetch_add(1, Ordering::SeqCst);

        if self.state() == BreakerState::HalfOpen {
            let successes = self.success_count.load(Ordering::SeqCst);
            if successes >= self.config.minimum_calls / 2
                && self
                    .state
                    .compare_exchange(
                        BreakerState::HALF_OPEN,
                        BreakerState::CLOSED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
            {
                self.reset_counters();
                info!(breaker = name, successes, "circuit breaker closed");
            }
            self.trial_taken.store(false, Ordering::SeqCst);
        }
    }

    fn record_failure(&self, name: &str, now: u64) {
        let total = self.total_count.fetch_add(1, Ordering::SeqCst) + 1;
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_failure_secs.store(now, Ordering::SeqCst);

        match self.state() {
            BreakerState::Closed => {
                if total >= self.config.minimum_calls {
                    let rate = failures as f64 / total as f64 * 100.0;
                    if rate >= self.config.failure_rate_threshold {
                        self.trip(now);
                        warn!(breaker = name, failures, total, rate, "circuit breaker opened");
                    }
                }
            }
            BreakerState::HalfOpen => {
                self.trip(now);
                warn!(breaker = name, "trial call failed, circuit breaker re-opened");
            }
            BreakerState::Open => {}
        }
    }

    fn trip(&self, now: u64) {
        self.trial_taken.store(false, Ordering::SeqCst);
        self.opened_at_secs.store(now, Ordering::SeqCst);
        self.state.store(BreakerState::OPEN, Ordering::SeqCst);
    }

    fn reset_counters(&self) {
        self.success_count.store(0, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);
        self.total_count.store(0, Ordering::SeqCst);
    }

    fn snapshot(&self, name: &str, now: u64) -> BreakerSnapshot {
        let state = self.state();
        let success_count = self.success_count.load(Ordering::SeqCst);
        let failure_count = self.failure_count.load(Ordering::SeqCst);
        let total_count = self.total_count.load(Ordering::SeqCst);
        let last_failure = self.last_failure_secs.load(Ordering::SeqCst);
        let opened_at = self.opened_at_secs.load(Ordering::SeqCst);
        let open_remaining_secs = match state {
            BreakerState::Open => Some(
                opened_at
                    .saturating_add(self.config.wait_duration.as_secs())
                    .saturating_sub(now),
            ),
            _ => None,
        };
        BreakerSnapshot {
            name: name.to_string(),
            state,
            success_count,
            failure_count,
            total_count,
            failure_rate: if total_count == 0 {
                0.0
            } else {
                failure_count as f64 / total_count as f64 * 100.0
            },
            last_failure_secs: (failure_count > 0 || last_failure > 0).then_some(last_failure),
            opened_at_secs: (state != BreakerState::Closed).then_some(opened_at),
            open_remaining_secs,
        }
    }
}

/// Registry of named circuit breakers.
///
/// - State for a name is created lazily by [`CircuitBreakers::allow`]
/// - Recording outcomes for a name that was never admitted is a no-op
/// - Per-name configs registered with [`CircuitBreakers::configure`] override the default
pub struct CircuitBreakers {
    clock: Arc<dyn Clock>,
    default_config: CircuitBreakerConfig,
    configs: DashMap<String, CircuitBreakerConfig>,
    breakers: DashMap<String, Arc<BreakerRecord>>,
}

impl CircuitBreakers {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, Arc::new(SystemClock))
    }

    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            default_config,
            configs: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Register a config for `name`. It applies whenever the breaker's state is
    /// created: on first admission, or after [`CircuitBreakers::reset`].
    pub fn configure(&self, name: impl Into<String>, config: CircuitBreakerConfig) {
        self.configs.insert(name.into(), config);
    }

    pub fn config_for(&self, name: &str) -> CircuitBreakerConfig {
        self.configs
            .get(name)
            .map(|c| c.value().clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    pub fn allow(&self, name: &str) -> bool {
        let record = self.record_or_create(name);
        let allowed = record.allow(name, self.clock.now_secs());
        if !allowed {
            debug!(breaker = name, "call rejected by circuit breaker");
        }
        allowed
    }

    pub fn record_success(&self, name: &str) {
        if let Some(record) = self.record(name) {
            record.record_success(name);
        }
    }

    pub fn record_failure(&self, name: &str) {
        if let Some(record) = self.record(name) {
            record.record_failure(name, self.clock.now_secs());
        }
    }

    /// Current state; names without state read as closed.
    pub fn state(&self, name: &str) -> BreakerState {
        self.record(name)
            .map(|r| r.state())
            .unwrap_or(BreakerState::Closed)
    }

    /// Delete all state for `name`, reverting it to a fresh closed breaker.
    pub fn reset(&self, name: &str) {
        self.breakers.remove(name);
        info!(breaker = name, "circuit breaker reset");
    }

    pub fn clear(&self) {
        self.breakers.clear();
        info!("all circuit breakers cleared");
    }

    pub fn snapshot(&self, name: &str) -> Option<BreakerSnapshot> {
        self.record(name)
            .map(|r| r.snapshot(name, self.clock.now_secs()))
    }

    /// Snapshots of every breaker with state, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let now = self.clock.now_secs();
        let mut snaps: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|e| e.value().snapshot(e.key(), now))
            .collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn record(&self, name: &str) -> Option<Arc<BreakerRecord>> {
        self.breakers.get(name).map(|r| Arc::clone(r.value()))
    }

    fn record_or_create(&self, name: &str) -> Arc<BreakerRecord> {
        if let Some(existing) = self.record(name) {
            return existing;
        }
        let config = self.config_for(name);
        Arc::clone(
            self.breakers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(BreakerRecord::new(config)))
                .value(),
        )
    }
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
