use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{circuit_breaker::CircuitState, job::QueueStats};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub dependencies: BTreeMap<String, DependencyHealth>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit: Option<CircuitState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    pub fn up(latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: Some(latency.as_millis() as u64),
            circuit: None,
            error: None,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            circuit: None,
            error: Some(error.into()),
        }
    }

    /// A tripped or probing breaker degrades its dependency without failing it.
    pub fn from_circuit(state: CircuitState) -> Self {
        let (status, error) = match state {
            CircuitState::Closed => (HealthStatus::Healthy, None),
            CircuitState::HalfOpen => (
                HealthStatus::Degraded,
                Some("Circuit breaker in recovery mode".to_string()),
            ),
            CircuitState::Open => (
                HealthStatus::Degraded,
                Some("Circuit breaker is open".to_string()),
            ),
        };

        Self {
            status,
            latency_ms: None,
            circuit: Some(state),
            error,
        }
    }
}
