use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub service: String,
    pub max_tokens: f64,
    pub tokens: f64,
    /// Estimated wait time until a token is available (ms), if currently empty.
    pub estimated_wait_ms: Option<u64>,
}

/// `max_requests` calls per `window`, with a burst of `max_requests`.
///
/// A zero `window` disables limiting. `max_requests` is floored at 1 so a
/// zero limit still throttles to one call per window.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimiterConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    pub fn is_unlimited(&self) -> bool {
        self.window.is_zero()
    }

    /// Bucket capacity, never below one token.
    pub fn burst(&self) -> u32 {
        self.max_requests.max(1)
    }

    /// Tokens regained per millisecond; zero when unlimited.
    pub fn refill_rate_per_ms(&self) -> f64 {
        if self.is_unlimited() {
            return 0.0;
        }
        self.burst() as f64 / (self.window.as_secs_f64() * 1000.0)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(10)
    }
}

#[derive(Debug)]
struct Bucket {
    unlimited: bool,
    max_tokens: f64,
    tokens: f64,
    refill_rate_per_ms: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(cfg: &RateLimiterConfig) -> Self {
        let max_tokens = cfg.burst() as f64;
        Self {
            unlimited: cfg.is_unlimited(),
            max_tokens,
            tokens: max_tokens,
            refill_rate_per_ms: cfg.refill_rate_per_ms(),
            last_refill: Instant::now(),
        }
    }

    fn unlimited(&self) -> bool {
        self.unlimited
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        if elapsed_ms > 0.0 {
            self.tokens = (self.tokens + elapsed_ms * self.refill_rate_per_ms).min(self.max_tokens);
            self.last_refill = now;
        }
    }

    fn wait_for_token(&self) -> Duration {
        let missing = (1.0 - self.tokens).max(0.0);
        // Rounding can leave a sliver short of a whole token; never spin on a zero sleep.
        Duration::from_secs_f64(missing / self.refill_rate_per_ms / 1000.0)
            .max(Duration::from_millis(1))
    }
}

/// Lazy token buckets, one per named service.
///
/// - No background refill: tokens are recomputed on every acquire
/// - The lock is released before sleeping
/// - Waiters re-check after waking, so concurrent callers never overdraw
pub struct RateLimiterRegistry {
    default_cfg: RateLimiterConfig,
    overrides: HashMap<String, RateLimiterConfig>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiterRegistry {
    pub fn new(default_cfg: RateLimiterConfig) -> Self {
        Self {
            default_cfg,
            overrides: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Use a dedicated limit for `service` instead of the default.
    pub fn with_service_limit(mut self, service: impl Into<String>, cfg: RateLimiterConfig) -> Self {
        self.overrides.insert(service.into(), cfg);
        self
    }

    pub fn config_for(&self, service: &str) -> &RateLimiterConfig {
        self.overrides.get(service).unwrap_or(&self.default_cfg)
    }

    fn bucket<'a>(&self, map: &'a mut HashMap<String, Bucket>, service: &str) -> &'a mut Bucket {
        map.entry(service.to_string())
            .or_insert_with(|| Bucket::full(self.config_for(service)))
    }

    /// Acquire one token for `service` (may sleep). Never fails.
    pub async fn acquire(&self, service: &str) {
        loop {
            let wait = {
                let mut map = self.buckets.lock().await;
                let bucket = self.bucket(&mut map, service);
                if bucket.unlimited() {
                    return;
                }
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                bucket.wait_for_token()
            };

            debug!(
                service,
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Try to acquire a token without waiting, returns true if successful
    pub async fn try_acquire(&self, service: &str) -> bool {
        let mut map = self.buckets.lock().await;
        let bucket = self.bucket(&mut map, service);
        if bucket.unlimited() {
            return true;
        }
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub async fn snapshot(&self, service: &str) -> RateLimiterSnapshot {
        let mut map = self.buckets.lock().await;
        let bucket = self.bucket(&mut map, service);
        let estimated_wait_ms = if bucket.unlimited() {
            None
        } else {
            bucket.refill(Instant::now());
            (bucket.tokens < 1.0).then(|| bucket.wait_for_token().as_millis() as u64)
        };
        RateLimiterSnapshot {
            service: service.to_string(),
            max_tokens: bucket.max_tokens,
            tokens: bucket.tokens,
            estimated_wait_ms,
        }
    }
}

impl Default for RateLimiterRegistry {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
