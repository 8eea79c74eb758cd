use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::{
    clients::{health::HealthProbe, redis::RedisConnection},
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        health::DependencyHealth,
    },
};

/// Breaker state kept in Redis under `circuit:<service>:*`, so every process
/// guarding the same downstream sees the same state.
pub struct CircuitBreaker {
    service_name: String,
    redis: Arc<RedisConnection>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: impl Into<String>,
        redis: Arc<RedisConnection>,
        config: CircuitBreakerConfig,
    ) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            redis,
            config,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match self.state().await? {
            CircuitState::Open => {
                if self.should_attempt_reset().await? {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.set_state(CircuitState::HalfOpen).await?;
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        match operation().await {
            Ok(result) => {
                self.record_success().await?;
                Ok(result)
            }
            Err(e) => {
                self.record_failure().await?;
                Err(e)
            }
        }
    }

    async fn record_success(&self) -> Result<(), Error> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.increment("successes", None).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                let mut conn = self.redis.get().await?;
                conn.del::<_, ()>(self.key("failures")).await?;
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&self) -> Result<(), Error> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .increment("failures", Some(self.config.timeout_seconds as i64))
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    pub async fn state(&self) -> Result<CircuitState, Error> {
        let mut conn = self.redis.get().await?;
        let value: Option<String> = conn.get(self.key("state")).await?;

        Ok(CircuitState::parse(value.as_deref()))
    }

    async fn set_state(&self, state: CircuitState) -> Result<(), Error> {
        let mut conn = self.redis.get().await?;
        conn.set::<_, _, ()>(self.key("state"), state.as_str()).await?;
        Ok(())
    }

    async fn open(&self) -> Result<(), Error> {
        self.set_state(CircuitState::Open).await?;

        let mut conn = self.redis.get().await?;
        conn.set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        Ok(())
    }

    async fn increment(&self, counter: &str, expire_seconds: Option<i64>) -> Result<u32, Error> {
        let key = self.key(counter);
        let mut conn = self.redis.get().await?;
        let count: u32 = conn.incr(&key, 1).await?;

        if let Some(seconds) = expire_seconds {
            conn.expire::<_, ()>(&key, seconds).await?;
        }

        Ok(count)
    }

    async fn reset_counters(&self) -> Result<(), Error> {
        let mut conn = self.redis.get().await?;
        conn.del::<_, ()>(vec![
            self.key("failures"),
            self.key("successes"),
            self.key("opened_at"),
        ])
        .await?;

        Ok(())
    }

    async fn should_attempt_reset(&self) -> Result<bool, Error> {
        let mut conn = self.redis.get().await?;
        let opened_at: Option<i64> = conn.get(self.key("opened_at")).await?;

        Ok(opened_at.is_some_and(|opened_at| {
            let elapsed = Utc::now().timestamp().saturating_sub(opened_at);
            elapsed >= self.config.timeout_seconds as i64
        }))
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service_name, suffix)
    }
}

#[async_trait]
impl HealthProbe for CircuitBreaker {
    fn name(&self) -> &str {
        &self.service_name
    }

    async fn check(&self) -> DependencyHealth {
        match self.state().await {
            Ok(state) => {
                debug!(
                    service = %self.service_name,
                    circuit_state = %state,
                    "Circuit breaker state checked"
                );
                DependencyHealth::from_circuit(state)
            }
            Err(e) => {
                warn!(
                    service = %self.service_name,
                    error = %e,
                    "Failed to check circuit breaker state"
                );
                DependencyHealth::down(format!("Cannot check circuit breaker: {}", e))
            }
        }
    }
}
