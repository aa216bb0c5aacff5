//! 弹性模式模块：提供重试、熔断器、限流器与优雅降级等可靠性保障机制。
//!
//! # Resilience Primitives Module
//!
//! This module protects calls to unreliable downstream collaborators (page
//! fetches, the vector store, the embedding backend, change detection) from
//! cascading failure.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Per-service circuit breakers (Closed / Open / HalfOpen) |
//! | [`rate_limiter`] | Per-service lazy token buckets |
//! | [`retry`] | Exponential backoff policy with injectable jitter |
//! | [`executor`] | [`ResilienceManager`] combining the above around one call |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: normal operation; 5 consecutive failures open the breaker
//! - **Open**: calls fail fast for a 60s cooldown
//! - **Half-Open**: calls are let through as probes; 3 successes close the
//!   breaker, any failure re-opens it
//!
//! ## Example
//!
//! ```rust,no_run
//! use ingest_resilience::resilience::{ResilienceManager, RetryConfig};
//!
//! # async fn run() -> ingest_resilience::Result<()> {
//! let manager = ResilienceManager::new();
//! let page = manager
//!     .execute_with_retry(
//!         || async { Ok::<_, std::io::Error>("<html></html>".to_string()) },
//!         "fetch",
//!         Some(RetryConfig::new().with_max_retries(2)),
//!         None,
//!     )
//!     .await?;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod executor;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use executor::{ResilienceManager, ResilienceManagerBuilder};
pub use rate_limiter::{RateLimiterConfig, RateLimiterRegistry};
pub use retry::{JitterSource, RetryConfig};
