use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of one breaker, for health-check reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(default)]
    pub success_count: u32,
    pub failure_threshold: u32,
    /// Seconds.
    pub recovery_timeout: f64,
    pub success_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Aggregate health across every registered breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub open_circuits: Vec<String>,
    pub breakers: Vec<BreakerSnapshot>,
}

impl HealthReport {
    pub fn from_snapshots(breakers: Vec<BreakerSnapshot>) -> Self {
        let open_circuits: Vec<String> = breakers
            .iter()
            .filter(|b| b.state == CircuitState::Open)
            .map(|b| b.name.clone())
            .collect();
        Self {
            healthy: open_circuits.is_empty(),
            open_circuits,
            breakers,
        }
    }
}
