use thiserror::Error;

/// Structured error context for configuration and admission failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "breakers.payments.minimum_calls")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "config_loader", "rate_limiter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the resilience layer.
///
/// Admission denials (`RateLimitExceeded`, `CircuitBreakerOpen`) are per-call and
/// recoverable. `CacheNotFound` and `Configuration` indicate a misconfigured caller.
/// Errors raised by loaders and guarded operations never pass through this type;
/// they stay in the caller's own error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit exceeded for '{key}': {message}")]
    RateLimitExceeded { key: String, message: String },

    #[error("Circuit breaker '{name}' is open: {message}")]
    CircuitBreakerOpen { name: String, message: String },

    #[error("Cache not found: {name}")]
    CacheNotFound { name: String },

    #[error("Invalid eviction pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn rate_limited(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::RateLimitExceeded {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn breaker_open(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::CircuitBreakerOpen {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn cache_not_found(name: impl Into<String>) -> Self {
        Error::CacheNotFound { name: name.into() }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// True for the two admission denials; the guarded operation was not invoked.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::RateLimitExceeded { .. } | Error::CircuitBreakerOpen { .. }
        )
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display_includes_context() {
        let err = Error::configuration_with_context(
            "minimum_calls must be positive",
            ErrorContext::new()
                .with_field_path("breakers.payments.minimum_calls")
                .with_source("config_loader"),
        );
        assert_eq!(
            err.to_string(),
            "Configuration error: minimum_calls must be positive \
             (field: breakers.payments.minimum_calls, source: config_loader)"
        );
        assert!(err.context().is_some());
    }

    #[test]
    fn test_rejections_are_classified() {
        assert!(Error::rate_limited("k", "slow down").is_rejection());
        assert!(Error::breaker_open("create", "unavailable").is_rejection());
        assert!(!Error::cache_not_found("missing").is_rejection());
    }

    #[test]
    fn test_cache_not_found_display() {
        assert_eq!(
            Error::cache_not_found("userStats").to_string(),
            "Cache not found: userStats"
        );
    }
}
