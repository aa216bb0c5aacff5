//! System health projection over circuit breaker state.
//!
//! Reading health never moves a breaker between states; it is safe to poll
//! from dashboards at any time, including mid-incident.

use crate::resilience::circuit_breaker::{CircuitBreakerSnapshot, CircuitState};
use serde::{Deserialize, Serialize};

/// Failures at which a closed service is reported as degraded.
pub const DEGRADED_FAILURE_COUNT: u32 = 2;

/// Ordered from best to worst, so `max` yields the overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl HealthStatus {
    /// Classify one breaker against the registry's failure threshold.
    pub fn classify(state: CircuitState, failure_count: u32, failure_threshold: u32) -> Self {
        match state {
            CircuitState::Closed if failure_count < DEGRADED_FAILURE_COUNT => Self::Healthy,
            CircuitState::Closed if failure_count < failure_threshold => Self::Degraded,
            _ => Self::Unhealthy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub status: HealthStatus,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealthSummary {
    pub overall: HealthStatus,
    pub services: Vec<ServiceHealth>,
}

impl SystemHealthSummary {
    pub fn from_snapshots(snapshots: &[CircuitBreakerSnapshot], failure_threshold: u32) -> Self {
        let services: Vec<ServiceHealth> = snapshots
            .iter()
            .map(|s| ServiceHealth {
                service: s.service.clone(),
                status: HealthStatus::classify(s.state, s.failure_count, failure_threshold),
                state: s.state,
                failure_count: s.failure_count,
                success_count: s.success_count,
                open_remaining_ms: s.open_remaining_ms,
            })
            .collect();
        let overall = services
            .iter()
            .map(|s| s.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self { overall, services }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.iter().find(|s| s.service == name)
    }

    /// Services currently not healthy, worst first.
    pub fn impaired(&self) -> Vec<&ServiceHealth> {
        let mut out: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.status != HealthStatus::Healthy)
            .collect();
        out.sort_by(|a, b| b.status.cmp(&a.status));
        out
    }
}
