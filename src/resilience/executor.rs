//! Resilient execution of caller-supplied operations.
//!
//! [`ResilienceManager`] owns the per-service registries and applies them
//! around a single unreliable call. It never spawns tasks: every executor runs
//! inside the caller's task, and registry locks are released before the
//! operation is awaited.

use super::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use super::rate_limiter::{RateLimiterConfig, RateLimiterRegistry};
use super::retry::{JitterSource, RetryConfig};
use crate::config::ResilienceConfig;
use crate::health::SystemHealthSummary;
use crate::report::{CrawlerError, PartialSuccessReport};
use crate::{Error, ErrorContext, Result};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

struct Inner {
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiterRegistry,
    retry: RetryConfig,
    jitter: JitterSource,
}

/// Entry point of the resilience layer.
///
/// Cloning is cheap and every clone shares the same breaker and limiter state.
/// Each test (or each pipeline) constructs its own instance.
#[derive(Clone)]
pub struct ResilienceManager {
    inner: Arc<Inner>,
}

/// Builder for [`ResilienceManager`].
#[derive(Debug, Default)]
pub struct ResilienceManagerBuilder {
    circuit_breaker: CircuitBreakerConfig,
    rate_limit: RateLimiterConfig,
    service_limits: Vec<(String, RateLimiterConfig)>,
    retry: RetryConfig,
    jitter_seed: Option<u64>,
}

impl ResilienceManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_circuit_breaker(mut self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = cfg;
        self
    }

    /// Default limit for services without a dedicated one.
    pub fn with_rate_limit(mut self, cfg: RateLimiterConfig) -> Self {
        self.rate_limit = cfg;
        self
    }

    pub fn with_service_rate_limit(
        mut self,
        service: impl Into<String>,
        cfg: RateLimiterConfig,
    ) -> Self {
        self.service_limits.push((service.into(), cfg));
        self
    }

    /// Retry policy used when a call does not supply its own.
    pub fn with_retry(mut self, cfg: RetryConfig) -> Self {
        self.retry = cfg;
        self
    }

    /// Make backoff jitter reproducible.
    pub fn with_jitter_seed(mut self, seed: u64) -> Self {
        self.jitter_seed = Some(seed);
        self
    }

    pub fn build(self) -> ResilienceManager {
        let limiter = self
            .service_limits
            .into_iter()
            .fold(RateLimiterRegistry::new(self.rate_limit), |reg, (name, cfg)| {
                reg.with_service_limit(name, cfg)
            });
        let jitter = match self.jitter_seed {
            Some(seed) => JitterSource::seeded(seed),
            None => JitterSource::from_entropy(),
        };
        ResilienceManager {
            inner: Arc::new(Inner {
                breakers: CircuitBreakerRegistry::new(self.circuit_breaker),
                limiter,
                retry: self.retry,
                jitter,
            }),
        }
    }
}

/// Settles one in-flight call against the breaker.
///
/// Dropping it unsettled (the caller's future was cancelled mid-call) counts
/// as a failure.
struct InFlight<'a> {
    breakers: &'a CircuitBreakerRegistry,
    service: &'a str,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn new(breakers: &'a CircuitBreakerRegistry, service: &'a str) -> Self {
        Self {
            breakers,
            service,
            settled: false,
        }
    }

    fn settle(mut self, success: bool) {
        self.settled = true;
        if success {
            self.breakers.record_success(self.service);
        } else {
            self.breakers.record_failure(self.service);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(service = self.service, "in-flight call cancelled");
            self.breakers.record_failure(self.service);
        }
    }
}

async fn invoke<T, E, Fut>(fut: Fut, timeout: Option<Duration>, ctx: ErrorContext) -> Result<T>
where
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => {
                return Err(Error::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                    context: ctx,
                })
            }
        },
        None => fut.await,
    };
    outcome.map_err(|e| Error::operation_failed(e.to_string(), ctx))
}

impl ResilienceManager {
    pub fn new() -> Self {
        ResilienceManagerBuilder::new().build()
    }

    pub fn builder() -> ResilienceManagerBuilder {
        ResilienceManagerBuilder::new()
    }

    /// Build from validated configuration.
    pub fn from_config(cfg: &ResilienceConfig) -> Result<Self> {
        cfg.validate()?;
        let builder = cfg.rate_limit.services.iter().fold(
            ResilienceManagerBuilder::new()
                .with_circuit_breaker(cfg.circuit_breaker.to_runtime())
                .with_rate_limit(cfg.rate_limit.default.to_runtime())
                .with_retry(cfg.retry.to_runtime()),
            |b, (name, limit)| b.with_service_rate_limit(name.clone(), limit.to_runtime()),
        );
        Ok(builder.build())
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.inner.breakers
    }

    pub fn rate_limiter(&self) -> &RateLimiterRegistry {
        &self.inner.limiter
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    fn circuit_open(&self, service: &str, ctx: ErrorContext) -> Error {
        let retry_after_ms = self
            .inner
            .breakers
            .snapshot(service)
            .and_then(|s| s.open_remaining_ms);
        Error::CircuitOpen {
            service: service.to_string(),
            retry_after_ms,
            context: ctx,
        }
    }

    /// Run `operation` with breaker gating, rate limiting and bounded retries.
    ///
    /// At most `max_retries + 1` attempts are made, strictly one after another.
    /// An attempt rejected by an open breaker does not invoke the operation
    /// but still counts as an attempt and as a breaker failure.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        mut operation: F,
        service: &str,
        config: Option<RetryConfig>,
        context: Option<serde_json::Value>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let cfg = config.unwrap_or_else(|| self.inner.retry.clone());
        let breakers = &self.inner.breakers;
        let mut attempt = 0u32;

        loop {
            let ctx = ErrorContext::new()
                .with_service(service)
                .with_attempt(attempt)
                .with_details(context.clone());

            let err = if !breakers.is_allowed(service) {
                breakers.record_failure(service);
                self.circuit_open(service, ctx)
            } else {
                self.inner.limiter.acquire(service).await;
                let call = InFlight::new(breakers, service);
                match invoke(operation(), cfg.attempt_timeout, ctx).await {
                    Ok(value) => {
                        call.settle(true);
                        return Ok(value);
                    }
                    Err(e) => {
                        call.settle(false);
                        e
                    }
                }
            };

            match cfg.next_delay(attempt, &self.inner.jitter) {
                Some(delay) => {
                    warn!(
                        service,
                        attempt,
                        max_retries = cfg.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        context = ?context,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    error!(
                        service,
                        attempt,
                        max_retries = cfg.max_retries,
                        context = ?context,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        attempts: attempt + 1,
                        retries: cfg.max_retries,
                        last_error: Box::new(err),
                        context: ErrorContext::new()
                            .with_service(service)
                            .with_attempt(attempt)
                            .with_details(context),
                    });
                }
            }
        }
    }

    /// Single breaker-gated invocation: no retries, no rate limiting.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut>(
        &self,
        operation: F,
        service: &str,
        context: Option<serde_json::Value>,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let breakers = &self.inner.breakers;
        let ctx = ErrorContext::new()
            .with_service(service)
            .with_details(context);

        if !breakers.is_allowed(service) {
            debug!(service, "call rejected, circuit breaker open");
            return Err(self.circuit_open(service, ctx));
        }

        let call = InFlight::new(breakers, service);
        match invoke(operation(), None, ctx).await {
            Ok(value) => {
                call.settle(true);
                Ok(value)
            }
            Err(e) => {
                call.settle(false);
                warn!(service, error = %e, "breaker-protected call failed");
                Err(e)
            }
        }
    }

    /// Try `primary` behind the breaker, then `fallback` unguarded.
    ///
    /// A fallback success is returned as a normal result. When both fail, the
    /// error carries both messages and the health at that moment.
    pub async fn execute_with_graceful_degradation<T, E1, E2, P, PFut, F, FFut>(
        &self,
        primary: P,
        fallback: F,
        service: &str,
        context: Option<serde_json::Value>,
    ) -> Result<T>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = std::result::Result<T, E1>>,
        E1: Display,
        F: FnOnce() -> FFut,
        FFut: Future<Output = std::result::Result<T, E2>>,
        E2: Display,
    {
        let primary_err = match self
            .execute_with_circuit_breaker(primary, service, context.clone())
            .await
        {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        match fallback().await {
            Ok(value) => {
                warn!(
                    service,
                    primary_error = %primary_err,
                    context = ?context,
                    "primary failed, served degraded result from fallback"
                );
                Ok(value)
            }
            Err(fallback_err) => {
                let health = self.system_health_summary();
                error!(
                    service,
                    primary_error = %primary_err,
                    fallback_error = %fallback_err,
                    health = %health.overall,
                    "primary and fallback both failed"
                );
                Err(Error::DegradationFailed {
                    primary: Box::new(primary_err),
                    fallback: fallback_err.to_string(),
                    health: Box::new(health),
                    context: ErrorContext::new()
                        .with_service(service)
                        .with_details(context),
                })
            }
        }
    }

    /// Health of every service the breakers have seen.
    pub fn system_health_summary(&self) -> SystemHealthSummary {
        let breakers = &self.inner.breakers;
        SystemHealthSummary::from_snapshots(&breakers.snapshots(), breakers.config().failure_threshold)
    }

    /// Aggregate a finished batch run, embedding the current health.
    pub fn create_report(
        &self,
        total_operations: usize,
        successful_operations: usize,
        errors: &[CrawlerError],
        execution_id: impl Into<String>,
    ) -> PartialSuccessReport {
        PartialSuccessReport::build(
            total_operations,
            successful_operations,
            errors,
            execution_id,
            self.system_health_summary(),
        )
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new()
    }
}
