use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use tracing::warn;

use crate::{
    models::health::{DependencyHealth, HealthReport, HealthStatus},
    ports::JobQueue,
};

/// Dependencies the pipeline cannot run without. Any other failing probe only
/// degrades the report.
pub const CRITICAL_DEPENDENCIES: &[&str] = &["database", "cache_service", "message_broker"];

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> DependencyHealth;
}

pub struct HealthChecker {
    probes: Vec<Arc<dyn HealthProbe>>,
    queue: Option<Arc<dyn JobQueue>>,
}

impl HealthChecker {
    pub fn new(probes: Vec<Arc<dyn HealthProbe>>) -> Self {
        Self {
            probes,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn check_all(&self) -> HealthReport {
        let dependencies: BTreeMap<String, DependencyHealth> =
            join_all(self.probes.iter().map(|probe| async move {
                (probe.name().to_string(), probe.check().await)
            }))
            .await
            .into_iter()
            .collect();

        let queue = match &self.queue {
            Some(queue) => queue
                .stats()
                .await
                .inspect_err(|e| warn!(error = %e, "Failed to read queue stats"))
                .ok(),
            None => None,
        };

        HealthReport {
            status: overall_status(&dependencies),
            timestamp: Utc::now(),
            dependencies,
            queue,
        }
    }
}

pub fn overall_status(dependencies: &BTreeMap<String, DependencyHealth>) -> HealthStatus {
    dependencies
        .iter()
        .map(|(name, health)| match health.status {
            HealthStatus::Unhealthy if !CRITICAL_DEPENDENCIES.contains(&name.as_str()) => {
                HealthStatus::Degraded
            }
            status => status,
        })
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::circuit_breaker::CircuitState;

    #[test]
    fn open_breaker_degrades_overall() {
        let mut deps = BTreeMap::new();
        deps.insert("database".to_string(), DependencyHealth::up(Duration::from_millis(3)));
        assert_eq!(overall_status(&deps), HealthStatus::Healthy);

        deps.insert(
            "email_service".to_string(),
            DependencyHealth::from_circuit(CircuitState::Open),
        );
        assert_eq!(overall_status(&deps), HealthStatus::Degraded);

        deps.insert("cache_service".to_string(), DependencyHealth::down("down"));
        assert_eq!(overall_status(&deps), HealthStatus::Unhealthy);
    }

    #[test]
    fn optional_dependency_failure_only_degrades() {
        let mut deps = BTreeMap::new();
        deps.insert("email_service".to_string(), DependencyHealth::down("redis gone"));

        assert_eq!(overall_status(&deps), HealthStatus::Degraded);
    }
}
