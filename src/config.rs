//! 配置加载：从 YAML/JSON 读取弹性策略参数。
//!
//! File-level configuration for the resilience layer.
//!
//! Durations are written in milliseconds so the same document can be shared
//! with non-Rust tooling. Every field has a default, so an empty document is
//! a valid configuration.
//!
//! ```yaml
//! retry:
//!   max_retries: 3
//!   base_delay_ms: 1000
//!   max_delay_ms: 30000
//!   backoff_multiplier: 2.0
//!   jitter: true
//! circuit_breaker:
//!   failure_threshold: 5
//!   success_threshold: 3
//!   cooldown_ms: 60000
//! rate_limit:
//!   default: { max_requests: 10, window_ms: 1000 }
//!   services:
//!     embeddings: { max_requests: 60, window_ms: 60000 }
//! ```

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::rate_limiter::RateLimiterConfig;
use crate::resilience::retry::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming an optional configuration file.
pub const CONFIG_ENV_VAR: &str = "INGEST_RESILIENCE_CONFIG";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResilienceConfig {
    pub retry: RetryPolicyConfig,
    pub circuit_breaker: CircuitBreakerPolicyConfig,
    pub rate_limit: RateLimitPolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicyConfig {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: cfg.base_delay.as_millis() as u64,
            max_delay_ms: cfg.max_delay.as_millis() as u64,
            backoff_multiplier: cfg.backoff_multiplier,
            jitter: cfg.jitter,
            attempt_timeout_ms: cfg.attempt_timeout.map(|d| d.as_millis() as u64),
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_runtime(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerPolicyConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerPolicyConfig {
    fn default() -> Self {
        let cfg = CircuitBreakerConfig::default();
        Self {
            failure_threshold: cfg.failure_threshold,
            success_threshold: cfg.success_threshold,
            cooldown_ms: cfg.cooldown.as_millis() as u64,
        }
    }
}

impl CircuitBreakerPolicyConfig {
    pub fn to_runtime(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new()
            .with_failure_threshold(self.failure_threshold)
            .with_success_threshold(self.success_threshold)
            .with_cooldown(Duration::from_millis(self.cooldown_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let cfg = RateLimiterConfig::default();
        Self {
            max_requests: cfg.max_requests,
            window_ms: cfg.window.as_millis() as u64,
        }
    }
}

impl RateLimitConfig {
    pub fn to_runtime(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.max_requests, Duration::from_millis(self.window_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitPolicyConfig {
    pub default: RateLimitConfig,
    /// Per-service overrides keyed by service name.
    pub services: BTreeMap<String, RateLimitConfig>,
}

impl ResilienceConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            Error::configuration(format!("Invalid YAML configuration: {}", e))
                .with_hint("Durations are given in milliseconds, e.g. `cooldown_ms: 60000`.")
        })
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::configuration(format!("Invalid JSON configuration: {}", e)))
    }

    /// Load from a `.json`, `.yaml` or `.yml` file and validate it.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::configuration(format!(
                "Failed to read configuration from {}: {}",
                path.display(),
                e
            ))
            .with_hint("Check if the file exists and you have read permissions.")
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        let cfg = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load the file named by `INGEST_RESILIENCE_CONFIG`, or defaults when unset.
    pub async fn load_from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(path.trim()).await,
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.retry;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier <= 1.0 {
            return Err(Error::configuration(format!(
                "retry.backoff_multiplier must be greater than 1.0, got {}",
                retry.backoff_multiplier
            )));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            return Err(Error::configuration(format!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                retry.max_delay_ms, retry.base_delay_ms
            )));
        }
        if retry.attempt_timeout_ms == Some(0) {
            return Err(Error::configuration(
                "retry.attempt_timeout_ms must be positive when set",
            ));
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 || cb.success_threshold == 0 {
            return Err(Error::configuration(
                "circuit_breaker thresholds must be at least 1",
            ));
        }

        let limits = std::iter::once(("default", &self.rate_limit.default)).chain(
            self.rate_limit
                .services
                .iter()
                .map(|(name, limit)| (name.as_str(), limit)),
        );
        for (name, limit) in limits {
            if limit.max_requests == 0 || limit.window_ms == 0 {
                return Err(Error::configuration(format!(
                    "rate_limit '{}' needs max_requests and window_ms above zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_runtime_defaults() {
        let cfg = ResilienceConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.to_runtime(), RetryConfig::default());
        assert_eq!(cfg.rate_limit.default.to_runtime(), RateLimiterConfig::default());
        let cb = cfg.circuit_breaker.to_runtime();
        assert_eq!(cb.failure_threshold, 5);
        assert_eq!(cb.success_threshold, 3);
        assert_eq!(cb.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let cfg = ResilienceConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, ResilienceConfig::default());
    }

    #[test]
    fn test_partial_yaml() {
        let cfg = ResilienceConfig::from_yaml_str(
            r#"
retry:
  max_retries: 5
  jitter: false
circuit_breaker:
  cooldown_ms: 1500
rate_limit:
  services:
    embeddings: { max_requests: 60, window_ms: 60000 }
"#,
        )
        .unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.retry.max_retries, 5);
        assert!(!cfg.retry.jitter);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert_eq!(
            cfg.circuit_breaker.to_runtime().cooldown,
            Duration::from_millis(1500)
        );
        assert_eq!(
            cfg.rate_limit.services["embeddings"].to_runtime(),
            RateLimiterConfig::per_minute(60)
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ResilienceConfig::from_yaml_str("retry:\n  max_retry: 3\n").unwrap_err();
        assert!(err.to_string().contains("Invalid YAML configuration"));
    }

    #[test]
    fn test_json_config() {
        let cfg = ResilienceConfig::from_json_str(
            r#"{"circuit_breaker": {"failure_threshold": 2}, "retry": {"attempt_timeout_ms": 500}}"#,
        )
        .unwrap();
        assert_eq!(cfg.circuit_breaker.failure_threshold, 2);
        assert_eq!(
            cfg.retry.to_runtime().attempt_timeout,
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_validation_failures() {
        let mut cfg = ResilienceConfig::default();
        cfg.retry.backoff_multiplier = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = ResilienceConfig::default();
        cfg.retry.max_delay_ms = 10;
        assert!(cfg.validate().is_err());

        let mut cfg = ResilienceConfig::default();
        cfg.circuit_breaker.success_threshold = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ResilienceConfig::default();
        cfg.rate_limit.services.insert(
            "fetch".into(),
            RateLimitConfig {
                max_requests: 0,
                window_ms: 1000,
            },
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("'fetch'"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("resilience.yaml");
        tokio::fs::write(&yaml, "retry:\n  max_retries: 1\n").await.unwrap();
        let cfg = ResilienceConfig::load_from_file(&yaml).await.unwrap();
        assert_eq!(cfg.retry.max_retries, 1);

        let json = dir.path().join("resilience.json");
        tokio::fs::write(&json, r#"{"retry": {"backoff_multiplier": 0.5}}"#)
            .await
            .unwrap();
        assert!(ResilienceConfig::load_from_file(&json).await.is_err());

        let missing = ResilienceConfig::load_from_file(dir.path().join("nope.yaml"))
            .await
            .unwrap_err();
        assert!(missing.to_string().contains("Hint"));
    }
}
