//! Admission interceptors wrapped around business operations.
//!
//! A [`Guard`] runs the same three steps around every guarded call:
//! - check each rate-limit rule in order, rejecting on the first denial
//! - ask the breaker (if any) for admission
//! - invoke the operation and record its outcome on the breaker
//!
//! A rejected call never reaches the operation. The operation's own error type flows
//! through untouched; it only needs `From<txguard::Error>` so rejections can be
//! expressed in it.

use crate::resilience::{CircuitBreakers, RateLimiter};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

/// Per-call information used to derive limiter keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Stable operation identifier, e.g. `createTransaction`.
    pub operation: String,
    /// Caller-provided subject such as an account or client id.
    pub subject: Option<String>,
}

impl CallContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            subject: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// Where a rate-limit rule takes its key from.
///
/// In configuration files this is a plain string: `$operation`, `$subject`, a template
/// such as `global:$subject`, or any other value used verbatim as a static key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KeySource {
    Static(String),
    Operation,
    /// The call's subject, or `unknown` when the call has none.
    Subject,
    /// Text with `$subject` and `$operation` placeholders, e.g. `global:$subject`.
    Template(String),
}

impl KeySource {
    pub fn template(template: impl Into<String>) -> Self {
        KeySource::Template(template.into())
    }

    pub fn resolve(&self, ctx: &CallContext) -> String {
        match self {
            KeySource::Static(key) => key.clone(),
            KeySource::Operation => ctx.operation.clone(),
            KeySource::Subject => subject_or_unknown(ctx).to_string(),
            KeySource::Template(template) => expand_template(template, ctx),
        }
    }
}

fn subject_or_unknown(ctx: &CallContext) -> &str {
    ctx.subject.as_deref().unwrap_or("unknown")
}

// Single pass, so placeholder text inside a substituted value is left alone.
fn expand_template(template: &str, ctx: &CallContext) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("$subject") {
            out.push_str(subject_or_unknown(ctx));
            rest = after;
        } else if let Some(after) = tail.strip_prefix("$operation") {
            out.push_str(&ctx.operation);
            rest = after;
        } else {
            out.push('$');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

impl Default for KeySource {
    fn default() -> Self {
        KeySource::Operation
    }
}

impl From<String> for KeySource {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "" | "$operation" => KeySource::Operation,
            "$subject" => KeySource::Subject,
            _ if raw.contains("$subject") || raw.contains("$operation") => {
                KeySource::Template(raw)
            }
            _ => KeySource::Static(raw),
        }
    }
}

impl From<KeySource> for String {
    fn from(source: KeySource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Static(key) | KeySource::Template(key) => write!(f, "{}", key),
            KeySource::Operation => write!(f, "$operation"),
            KeySource::Subject => write!(f, "$subject"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitRule {
    pub key: KeySource,
    pub limit: u32,
    pub window_seconds: u64,
    pub message: String,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            key: KeySource::Operation,
            limit: 1000,
            window_seconds: 60,
            message: DEFAULT_RATE_LIMIT_MESSAGE.to_string(),
        }
    }
}

impl RateLimitRule {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: KeySource) -> Self {
        self.key = key;
        self
    }

    pub fn with_static_key(self, key: impl Into<String>) -> Self {
        self.with_key(KeySource::Static(key.into()))
    }

    pub fn per_subject(self) -> Self {
        self.with_key(KeySource::Subject)
    }

    /// Per-subject key in its own namespace, `<prefix>:<subject>`.
    pub fn per_subject_with_prefix(self, prefix: &str) -> Self {
        self.with_key(KeySource::Template(format!("{}:$subject", prefix)))
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerRule {
    pub name: String,
    /// Overrides the breaker's configured rejection message.
    pub message: Option<String>,
}

impl BreakerRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Admission rules for one guarded operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GuardPolicy {
    pub rate_limits: Vec<RateLimitRule>,
    pub breaker: Option<BreakerRule>,
}

impl GuardPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limits.push(rule);
        self
    }

    pub fn with_breaker(mut self, rule: BreakerRule) -> Self {
        self.breaker = Some(rule);
        self
    }
}

/// Runs guarded calls against a shared limiter and breaker registry.
#[derive(Clone)]
pub struct Guard {
    limiter: Arc<RateLimiter>,
    breakers: Arc<CircuitBreakers>,
}

impl Guard {
    pub fn new(limiter: Arc<RateLimiter>, breakers: Arc<CircuitBreakers>) -> Self {
        Self { limiter, breakers }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    /// Run the pre-checks for `policy` without invoking anything.
    ///
    /// Rules are checked in order and every admitted rule has already counted the call
    /// by the time a later rule or the breaker rejects it.
    pub fn admit(&self, ctx: &CallContext, policy: &GuardPolicy) -> Result<(), Error> {
        for rule in &policy.rate_limits {
            let key = rule.key.resolve(ctx);
            if !self.limiter.allow(&key, rule.limit, rule.window_seconds) {
                warn!(operation = %ctx.operation, key = %key, limit = rule.limit, "call rejected by rate limiter");
                return Err(Error::rate_limited(key, rule.message.clone()));
            }
        }

        if let Some(breaker) = &policy.breaker {
            if !self.breakers.allow(&breaker.name) {
                warn!(operation = %ctx.operation, breaker = %breaker.name, "call rejected by open circuit breaker");
                let message = breaker
                    .message
                    .clone()
                    .unwrap_or_else(|| self.breakers.config_for(&breaker.name).message);
                return Err(Error::breaker_open(breaker.name.clone(), message));
            }
        }
        Ok(())
    }

    /// Guard a synchronous operation.
    ///
    /// A panicking `op` counts as a breaker failure before the panic continues.
    pub fn call<T, E, F>(&self, ctx: &CallContext, policy: &GuardPolicy, op: F) -> Result<T, E>
    where
        E: From<Error>,
        F: FnOnce() -> Result<T, E>,
    {
        self.admit(ctx, policy)?;
        let pending = PendingOutcome::new(&self.breakers, ctx, policy);
        let result = op();
        pending.settle(&result);
        result
    }

    /// Guard an async operation; the future is created only after admission.
    ///
    /// Dropping the returned future after admission (a timeout, `select!`, an aborted
    /// task) counts as a breaker failure, so a half-open trial is never left in flight.
    pub async fn call_async<T, E, F, Fut>(
        &self,
        ctx: &CallContext,
        policy: &GuardPolicy,
        op: F,
    ) -> Result<T, E>
    where
        E: From<Error>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.admit(ctx, policy)?;
        let pending = PendingOutcome::new(&self.breakers, ctx, policy);
        let result = op().await;
        pending.settle(&result);
        result
    }
}

/// Breaker outcome owed by an admitted call.
///
/// Settled with the real result on completion; dropped unsettled it records a failure,
/// which also hands back a single half-open trial.
struct PendingOutcome<'a> {
    breakers: &'a CircuitBreakers,
    operation: &'a str,
    breaker: Option<&'a str>,
}

impl<'a> PendingOutcome<'a> {
    fn new(breakers: &'a CircuitBreakers, ctx: &'a CallContext, policy: &'a GuardPolicy) -> Self {
        Self {
            breakers,
            operation: &ctx.operation,
            breaker: policy.breaker.as_ref().map(|b| b.name.as_str()),
        }
    }

    fn settle<T, E>(mut self, result: &Result<T, E>) {
        let Some(name) = self.breaker.take() else {
            return;
        };
        match result {
            Ok(_) => self.breakers.record_success(name),
            Err(_) => {
                debug!(operation = self.operation, breaker = name, "guarded call failed");
                self.breakers.record_failure(name);
            }
        }
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if let Some(name) = self.breaker.take() {
            warn!(operation = self.operation, breaker = name, "guarded call abandoned before completion");
            self.breakers.record_failure(name);
        }
    }
}
