//! # ingest-resilience
//!
//! 这是内容采集管线的弹性控制层，为不可靠的下游调用提供重试、熔断、限流与降级。
//!
//! Resilience control layer for a batch content-ingestion pipeline.
//!
//! ## Overview
//!
//! Ingestion runs call several unreliable collaborators per document: the
//! page fetcher, the embedding backend, the vector store and the change
//! detector. This crate wraps each such call without knowing what it does,
//! and reports on the run once it is over.
//!
//! ## Key Features
//!
//! - **Retry**: bounded retries with exponential backoff and jitter
//! - **Circuit breakers**: per-service failure isolation with half-open probing
//! - **Rate limiting**: per-service lazy token buckets
//! - **Graceful degradation**: primary/fallback execution
//! - **Reporting**: partial-success reports and a system health summary
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ingest_resilience::report::OutcomeCollector;
//! use ingest_resilience::ResilienceManager;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = ResilienceManager::new();
//!     let outcomes = OutcomeCollector::new();
//!
//!     for url in ["https://a.example", "https://b.example"] {
//!         let result = manager
//!             .execute_with_retry(|| async { Ok::<_, String>(url.len()) }, "fetch", None, None)
//!             .await;
//!         outcomes.record(url, result);
//!     }
//!
//!     let report = outcomes.report(manager.system_health_summary());
//!     println!("{}", serde_json::to_string_pretty(&report).unwrap());
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Retry, circuit breakers, rate limiting, degradation |
//! | [`health`] | System health projection over breaker state |
//! | [`report`] | Partial-success reports and outcome collection |
//! | [`config`] | YAML/JSON configuration loading |

pub mod config;
pub mod health;
pub mod report;
pub mod resilience;

pub use config::ResilienceConfig;
pub use health::{HealthStatus, SystemHealthSummary};
pub use report::{CrawlerError, ErrorType, OutcomeCollector, PartialSuccessReport};
pub use resilience::{ResilienceManager, RetryConfig};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
