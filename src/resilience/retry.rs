//! Retry policy
//!
//! Exponential backoff with optional ±25% jitter. The random source is
//! injectable so sequences can be reproduced in tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

/// Fraction of the computed delay used as the jitter range in each direction.
pub const JITTER_FRACTION: f64 = 0.25;

/// Configuration for retry logic
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts is `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Per-attempt deadline. An elapsed deadline counts as a failure.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Deterministic backoff: `min(base * multiplier^attempt, max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        let cap = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.max_delay;
        }
        secs_to_duration(secs)
    }

    /// Delay to wait after failed attempt `attempt`, or `None` when it was the last one.
    pub fn next_delay(&self, attempt: u32, jitter: &JitterSource) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let delay = self.backoff_delay(attempt);
        Some(if self.jitter {
            jitter.perturb(delay, self.max_delay)
        } else {
            delay
        })
    }
}

// Round to the nearest nanosecond so 0.1s * 4 lands on exactly 400ms.
fn secs_to_duration(secs: f64) -> Duration {
    Duration::from_nanos((secs.max(0.0) * 1e9).round() as u64)
}

/// Random source for backoff jitter.
pub struct JitterSource {
    rng: Mutex<StdRng>,
}

impl JitterSource {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible source for tests and simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Shift `delay` uniformly within ±25%, clamped to `[0, max]`.
    pub fn perturb(&self, delay: Duration, max: Duration) -> Duration {
        let base = delay.as_secs_f64();
        let spread = base * JITTER_FRACTION;
        if spread <= 0.0 {
            return delay.min(max);
        }
        let offset = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(-spread..=spread)
        };
        secs_to_duration((base + offset).clamp(0.0, max.as_secs_f64()))
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for JitterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JitterSource").finish_non_exhaustive()
    }
}
