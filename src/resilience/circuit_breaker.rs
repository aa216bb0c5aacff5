use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Gating state of one service's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures in Closed before the breaker opens.
    pub failure_threshold: u32,
    /// Successes in HalfOpen before the breaker closes.
    pub success_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Point-in-time view of a single service's breaker.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Time since the last recorded failure, in ms.
    pub last_failure_ago_ms: Option<u64>,
    /// Remaining open time in ms, if currently open and cooling down.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            next_attempt: None,
        }
    }
}

/// Per-service circuit breakers behind a single mutex.
///
/// - Entries are created lazily (Closed, zero counters) on first use
/// - The lock is held only while reading or updating state, never across a call
/// - Recording never fails
pub struct CircuitBreakerRegistry {
    cfg: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerState>> {
        // Updates are plain field writes, so a poisoned map is still consistent.
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry<'a>(
        map: &'a mut HashMap<String, BreakerState>,
        service: &str,
    ) -> &'a mut BreakerState {
        map.entry(service.to_string())
            .or_insert_with(BreakerState::closed)
    }

    /// Whether a call to `service` may proceed.
    ///
    /// An open breaker whose cooldown has elapsed moves to HalfOpen here and
    /// admits the caller as a probe.
    pub fn is_allowed(&self, service: &str) -> bool {
        let mut map = self.lock();
        let st = Self::entry(&mut map, service);
        match st.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = Instant::now();
                match st.next_attempt {
                    Some(at) if now < at => false,
                    _ => {
                        st.state = CircuitState::HalfOpen;
                        st.success_count = 0;
                        info!(service, "circuit breaker half-open, probing recovery");
                        true
                    }
                }
            }
        }
    }

    pub fn record_success(&self, service: &str) {
        let mut map = self.lock();
        let st = Self::entry(&mut map, service);
        match st.state {
            CircuitState::Closed => {
                st.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                st.success_count = st.success_count.saturating_add(1);
                if st.success_count >= self.cfg.success_threshold {
                    st.state = CircuitState::Closed;
                    st.failure_count = 0;
                    st.success_count = 0;
                    st.next_attempt = None;
                    info!(service, "circuit breaker closed, service recovered");
                }
            }
            // A call admitted before the breaker opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, service: &str) {
        let mut map = self.lock();
        let st = Self::entry(&mut map, service);
        let now = Instant::now();
        st.last_failure = Some(now);
        match st.state {
            CircuitState::Closed => {
                st.failure_count = st.failure_count.saturating_add(1);
                if st.failure_count >= self.cfg.failure_threshold {
                    st.state = CircuitState::Open;
                    st.success_count = 0;
                    st.next_attempt = Some(now + self.cfg.cooldown);
                    warn!(
                        service,
                        failure_count = st.failure_count,
                        cooldown_ms = self.cfg.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                st.state = CircuitState::Open;
                st.success_count = 0;
                st.next_attempt = Some(now + self.cfg.cooldown);
                warn!(service, "circuit breaker re-opened, probe failed");
            }
            CircuitState::Open => {
                st.failure_count = st.failure_count.saturating_add(1);
            }
        }
    }

    /// Force a service back to Closed with cleared counters.
    pub fn reset(&self, service: &str) {
        let mut map = self.lock();
        map.insert(service.to_string(), BreakerState::closed());
        info!(service, "circuit breaker reset");
    }

    /// Snapshot of one service, without creating an entry for unknown names.
    pub fn snapshot(&self, service: &str) -> Option<CircuitBreakerSnapshot> {
        let now = Instant::now();
        let map = self.lock();
        map.get(service).map(|st| Self::project(service, st, now))
    }

    /// Snapshots of every known service, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let now = Instant::now();
        let map = self.lock();
        let mut out: Vec<_> = map
            .iter()
            .map(|(name, st)| Self::project(name, st, now))
            .collect();
        out.sort_by(|a, b| a.service.cmp(&b.service));
        out
    }

    fn project(service: &str, st: &BreakerState, now: Instant) -> CircuitBreakerSnapshot {
        let open_remaining_ms = match st.state {
            CircuitState::Open => st
                .next_attempt
                .filter(|at| *at > now)
                .map(|at| (at - now).as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            service: service.to_string(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            last_failure_ago_ms: st
                .last_failure
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            open_remaining_ms,
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn open(reg: &CircuitBreakerRegistry, service: &str) {
        for _ in 0..reg.config().failure_threshold {
            reg.record_failure(service);
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.success_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(60));
    }

    #[test]
    fn test_unknown_service_is_closed() {
        let reg = CircuitBreakerRegistry::default();
        assert!(reg.snapshot("fetch").is_none());
        assert!(reg.is_allowed("fetch"));

        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.success_count, 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let reg = CircuitBreakerRegistry::default();
        for _ in 0..4 {
            reg.record_failure("fetch");
        }
        assert_eq!(reg.snapshot("fetch").unwrap().state, CircuitState::Closed);
        assert!(reg.is_allowed("fetch"));

        reg.record_failure("fetch");
        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::Open);
        assert!(snap.open_remaining_ms.is_some());
        assert!(!reg.is_allowed("fetch"));
    }

    #[test]
    fn test_success_resets_failures() {
        let reg = CircuitBreakerRegistry::default();
        for _ in 0..4 {
            reg.record_failure("storage");
        }
        reg.record_success("storage");
        assert_eq!(reg.snapshot("storage").unwrap().failure_count, 0);

        // Four more failures must not open it: the run was interrupted.
        for _ in 0..4 {
            reg.record_failure("storage");
        }
        assert_eq!(reg.snapshot("storage").unwrap().state, CircuitState::Closed);
    }

    #[test]
    fn test_services_are_independent() {
        let reg = CircuitBreakerRegistry::default();
        open(&reg, "embeddings");
        assert!(!reg.is_allowed("embeddings"));
        assert!(reg.is_allowed("storage"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_cooldown() {
        let reg = CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().with_cooldown(Duration::from_secs(60)),
        );
        open(&reg, "fetch");
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!reg.is_allowed("fetch"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(reg.is_allowed("fetch"));
        assert_eq!(reg.snapshot("fetch").unwrap().state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovers_after_success_threshold() {
        let reg = CircuitBreakerRegistry::default();
        open(&reg, "fetch");
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(reg.is_allowed("fetch"));

        reg.record_success("fetch");
        reg.record_success("fetch");
        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.success_count, 2);

        reg.record_success("fetch");
        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let reg = CircuitBreakerRegistry::default();
        open(&reg, "fetch");
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(reg.is_allowed("fetch"));
        reg.record_success("fetch");

        reg.record_failure("fetch");
        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.success_count, 0);
        assert_eq!(snap.open_remaining_ms, Some(60_000));
        assert!(!reg.is_allowed("fetch"));
    }

    #[test]
    fn test_reset_closes_breaker() {
        let reg = CircuitBreakerRegistry::default();
        open(&reg, "fetch");
        reg.reset("fetch");
        let snap = reg.snapshot("fetch").unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
    }

    #[test]
    fn test_snapshots_sorted() {
        let reg = CircuitBreakerRegistry::default();
        reg.record_success("vector_store");
        reg.record_failure("embeddings");
        reg.record_success("fetch");
        let names: Vec<_> = reg.snapshots().into_iter().map(|s| s.service).collect();
        assert_eq!(names, vec!["embeddings", "fetch", "vector_store"]);
    }

    #[test]
    fn test_concurrent_failures_are_not_lost() {
        let reg = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new().with_failure_threshold(100),
        ));

        let mut handles = vec![];
        for _ in 0..10 {
            let reg = Arc::clone(&reg);
            handles.push(thread::spawn(move || {
                for _ in 0..5 {
                    reg.record_failure("fetch");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(reg.snapshot("fetch").unwrap().failure_count, 50);
    }
}
