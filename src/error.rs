use crate::health::SystemHealthSummary;
use thiserror::Error;

/// Structured context attached to every failure surfaced by the executors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorContext {
    /// Named downstream service the call was made against (e.g. "vector_store").
    pub service: Option<String>,
    /// 0-based attempt number the failure belongs to.
    pub attempt: Option<u32>,
    /// Caller-supplied context object, passed through untouched.
    pub details: Option<serde_json::Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_details(mut self, details: Option<serde_json::Value>) -> Self {
        self.details = details;
        self
    }
}

/// Unified error type for the resilience layer.
#[derive(Debug, Error)]
pub enum Error {
    /// The wrapped operation itself failed. Safe to retry.
    #[error("Operation failed: {message}{}", format_context(.context))]
    OperationFailed {
        message: String,
        context: ErrorContext,
    },

    /// The call was rejected without invoking the operation.
    #[error("Circuit breaker open for service '{service}'{}", format_context(.context))]
    CircuitOpen {
        service: String,
        /// Time left before the breaker admits a probe call.
        retry_after_ms: Option<u64>,
        context: ErrorContext,
    },

    #[error("Operation timed out after {timeout_ms}ms{}", format_context(.context))]
    Timeout {
        timeout_ms: u64,
        context: ErrorContext,
    },

    /// The last error already renders the call's context, so it is not repeated.
    #[error("Operation failed after {retries} retries ({attempts} attempts): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        retries: u32,
        #[source]
        last_error: Box<Error>,
        context: ErrorContext,
    },

    /// Both the primary and the fallback path failed.
    #[error("Primary and fallback both failed (system health: {}). Primary: {primary}. Fallback: {fallback}", .health.overall)]
    DegradationFailed {
        #[source]
        primary: Box<Error>,
        fallback: String,
        /// Health at the moment the fallback failed.
        health: Box<SystemHealthSummary>,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", .hint.as_ref().map(|h| format!("\n Hint: {}", h)).unwrap_or_default())]
    Configuration {
        message: String,
        hint: Option<String>,
    },
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref service) = ctx.service {
        parts.push(format!("service: {}", service));
    }
    if let Some(attempt) = ctx.attempt {
        parts.push(format!("attempt: {}", attempt));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("context: {}", details));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn operation_failed(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::OperationFailed {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            hint: None,
        }
    }

    /// Attach an actionable hint to a configuration error
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if let Error::Configuration { hint: ref mut h, .. } = self {
            *h = Some(hint.into());
        }
        self
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::OperationFailed { context, .. }
            | Error::CircuitOpen { context, .. }
            | Error::Timeout { context, .. }
            | Error::RetriesExhausted { context, .. }
            | Error::DegradationFailed { context, .. } => Some(context),
            Error::Configuration { .. } => None,
        }
    }

    /// Service the failing call targeted, if known.
    pub fn service(&self) -> Option<&str> {
        self.context().and_then(|c| c.service.as_deref())
    }

    /// Innermost failure: the last attempt of an exhausted retry sequence, or
    /// the primary failure of a failed degradation.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { last_error, .. } => last_error.root_cause(),
            Error::DegradationFailed { primary, .. } => primary.root_cause(),
            other => other,
        }
    }

    /// True when the call was rejected by an open breaker, directly or as the
    /// last error of an exhausted retry sequence.
    pub fn is_circuit_open(&self) -> bool {
        match self {
            Error::CircuitOpen { .. } => true,
            Error::RetriesExhausted { last_error, .. } => last_error.is_circuit_open(),
            _ => false,
        }
    }
}
