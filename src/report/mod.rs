//! 部分成功报告：汇总批处理运行中的错误并生成建议。
//!
//! # Partial Success Reporting
//!
//! Batch ingestion runs rarely succeed or fail as a whole. This module turns
//! the errors collected during a run into a [`PartialSuccessReport`]: counts,
//! a breakdown by [`ErrorType`], the URLs that are worth retrying, and
//! advisory recommendations derived from fixed thresholds.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CrawlerError`] | One failed operation, classified by type and recoverability |
//! | [`PartialSuccessReport`] | Immutable aggregation over a run's errors |
//! | [`OutcomeCollector`] | Thread-safe accumulator feeding the report |
//!
//! ## Example
//!
//! ```rust
//! use ingest_resilience::health::SystemHealthSummary;
//! use ingest_resilience::report::{CrawlerError, ErrorType, PartialSuccessReport};
//!
//! let errors = vec![CrawlerError::new("https://a.example", ErrorType::Network, true, "reset")];
//! let health = SystemHealthSummary::from_snapshots(&[], 5);
//! let report = PartialSuccessReport::build(4, 3, &errors, "run-1", health);
//! assert!(report.partial_success);
//! assert_eq!(report.retryable_operations, vec!["https://a.example".to_string()]);
//! ```

mod collector;

pub use collector::OutcomeCollector;

use crate::health::SystemHealthSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of a failed ingestion operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Network,
    Storage,
    Embedding,
    Parsing,
    Validation,
    Other,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Embedding => "embedding",
            Self::Parsing => "parsing",
            Self::Validation => "validation",
            Self::Other => "other",
        }
    }

    /// Whether failures of this type are safe to retry by default.
    pub fn default_recoverable(&self) -> bool {
        matches!(self, Self::Network | Self::Storage | Self::Embedding)
    }

    /// Best-effort classification from an error message.
    ///
    /// Checked most specific first: an embedding call that timed out is an
    /// embedding failure, not a network one.
    pub fn classify(message: &str) -> Self {
        let m = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));
        if has(&["embedding", "openai", "quota", "token limit"]) {
            Self::Embedding
        } else if has(&["vector", "storage", "database", "upsert", "index"]) {
            Self::Storage
        } else if has(&["parse", "parsing", "json", "html", "malformed", "utf-8"]) {
            Self::Parsing
        } else if has(&["validation", "invalid", "required field", "schema"]) {
            Self::Validation
        } else if has(&[
            "network",
            "timeout",
            "timed out",
            "connection",
            "econnrefused",
            "econnreset",
            "enotfound",
            "dns",
            "fetch",
            "socket",
            "circuit breaker open",
        ]) {
            Self::Network
        } else {
            Self::Other
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed operation as recorded by a batch caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlerError {
    pub url: String,
    pub error_type: ErrorType,
    pub recoverable: bool,
    pub message: String,
}

impl CrawlerError {
    pub fn new(
        url: impl Into<String>,
        error_type: ErrorType,
        recoverable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            error_type,
            recoverable,
            message: message.into(),
        }
    }

    /// Build an error whose type and recoverability are inferred from `message`.
    pub fn classify(url: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let error_type = ErrorType::classify(&message);
        Self {
            url: url.into(),
            error_type,
            recoverable: error_type.default_recoverable(),
            message,
        }
    }

    /// Classify an executor error by its root cause.
    ///
    /// The formatted error also carries the service name and caller context,
    /// which must not influence the classification.
    pub fn from_error(url: impl Into<String>, err: &crate::Error) -> Self {
        use crate::Error;
        match err.root_cause() {
            Error::OperationFailed { message, .. } | Error::Configuration { message, .. } => {
                Self::classify(url, message.clone())
            }
            Error::CircuitOpen { service, .. } => Self::new(
                url,
                ErrorType::Network,
                true,
                format!("circuit breaker open for service '{}'", service),
            ),
            Error::Timeout { timeout_ms, .. } => Self::new(
                url,
                ErrorType::Network,
                true,
                format!("operation timed out after {}ms", timeout_ms),
            ),
            other => Self::classify(url, other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    pub by_type: BTreeMap<ErrorType, usize>,
    pub recoverable: usize,
    pub non_recoverable: usize,
}

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSuccessReport {
    pub execution_id: String,
    pub total_operations: usize,
    pub successful_operations: usize,
    pub failed_operations: usize,
    pub success_rate: f64,
    pub partial_success: bool,
    pub errors: ErrorBreakdown,
    pub recommendations: Vec<String>,
    /// URLs of recoverable failures, in input order. Not de-duplicated.
    pub retryable_operations: Vec<String>,
    pub system_health: SystemHealthSummary,
}

impl PartialSuccessReport {
    /// Pure aggregation; `successful > total` is a caller bug and is not checked.
    pub fn build(
        total_operations: usize,
        successful_operations: usize,
        errors: &[CrawlerError],
        execution_id: impl Into<String>,
        system_health: SystemHealthSummary,
    ) -> Self {
        let failed_operations = total_operations.saturating_sub(successful_operations);
        let success_rate = if total_operations == 0 {
            0.0
        } else {
            successful_operations as f64 / total_operations as f64
        };

        let mut by_type = BTreeMap::new();
        for e in errors {
            *by_type.entry(e.error_type).or_insert(0) += 1;
        }
        let retryable_operations: Vec<String> = errors
            .iter()
            .filter(|e| e.recoverable)
            .map(|e| e.url.clone())
            .collect();
        let recoverable = retryable_operations.len();

        Self {
            execution_id: execution_id.into(),
            total_operations,
            successful_operations,
            failed_operations,
            success_rate,
            partial_success: successful_operations > 0 && failed_operations > 0,
            recommendations: recommendations(&by_type, errors.len()),
            errors: ErrorBreakdown {
                by_type,
                recoverable,
                non_recoverable: errors.len() - recoverable,
            },
            retryable_operations,
            system_health,
        }
    }

    pub fn count(&self, error_type: ErrorType) -> usize {
        self.errors.by_type.get(&error_type).copied().unwrap_or(0)
    }
}

fn recommendations(by_type: &BTreeMap<ErrorType, usize>, total_errors: usize) -> Vec<String> {
    let count = |t: ErrorType| by_type.get(&t).copied().unwrap_or(0);
    let mut out = Vec::new();

    let network = count(ErrorType::Network);
    if network > 0 {
        out.push(format!(
            "{} network error(s): check connectivity to the source sites",
            network
        ));
    }
    if network > 5 {
        out.push("Frequent network errors: increase the retry base delay".to_string());
    }

    let storage = count(ErrorType::Storage);
    if storage > 0 {
        out.push(format!(
            "{} storage error(s): check vector store availability",
            storage
        ));
    }
    if storage > 3 {
        out.push("Repeated storage failures: put the storage backend behind a circuit breaker".to_string());
    }

    let embedding = count(ErrorType::Embedding);
    if embedding > 0 {
        out.push(format!(
            "{} embedding error(s): check embedding API quota",
            embedding
        ));
    }
    if embedding > 10 {
        out.push("Many embedding failures: apply more aggressive rate limiting".to_string());
    }

    if total_errors > 10 {
        out.push(format!(
            "{} errors in one run: reduce the batch size",
            total_errors
        ));
    }
    out
}
