use std::time::Duration;

use anyhow::{Context, Error, Result};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, job::JobOptions, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub redis_url: String,
    pub database_url: String,
    pub rabbitmq_url: String,
    pub email_service_url: String,
    pub app_base_url: String,

    #[serde(default)]
    pub email_service_api_key: Option<String>,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_realtime_exchange")]
    pub realtime_exchange: String,

    #[serde(default = "default_dedup_ttl_seconds")]
    pub dedup_ttl_seconds: u64,
    #[serde(default = "default_retention_days")]
    pub notification_retention_days: i64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,

    #[serde(default = "default_job_attempts")]
    pub job_attempts: u32,
    #[serde(default = "default_job_backoff_initial_ms")]
    pub job_backoff_initial_ms: u64,
    #[serde(default = "default_job_backoff_max_ms")]
    pub job_backoff_max_ms: u64,
    #[serde(default = "default_multiplier")]
    pub job_backoff_multiplier: u64,
    #[serde(default = "default_keep_completed_jobs")]
    pub keep_completed_jobs: usize,
    #[serde(default = "default_keep_failed_jobs")]
    pub keep_failed_jobs: usize,
    #[serde(default = "default_queue_clean_interval_seconds")]
    pub queue_clean_interval_seconds: u64,
    /// Active jobs older than this are treated as stalled.
    #[serde(default = "default_job_lock_timeout_seconds")]
    pub job_lock_timeout_seconds: u64,
    #[serde(default = "default_stalled_check_interval_seconds")]
    pub stalled_check_interval_seconds: u64,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_queue_name() -> String {
    "notifications".to_string()
}

fn default_realtime_exchange() -> String {
    "notifications.realtime".to_string()
}

fn default_dedup_ttl_seconds() -> u64 {
    300
}

fn default_retention_days() -> i64 {
    30
}

fn default_worker_concurrency() -> usize {
    10
}

fn default_worker_poll_interval_ms() -> u64 {
    500
}

fn default_job_attempts() -> u32 {
    3
}

fn default_job_backoff_initial_ms() -> u64 {
    2_000
}

fn default_job_backoff_max_ms() -> u64 {
    60_000
}

fn default_multiplier() -> u64 {
    2
}

fn default_keep_completed_jobs() -> usize {
    100
}

fn default_keep_failed_jobs() -> usize {
    50
}

fn default_queue_clean_interval_seconds() -> u64 {
    3_600
}

fn default_job_lock_timeout_seconds() -> u64 {
    300
}

fn default_stalled_check_interval_seconds() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_breaker_timeout_seconds() -> u64 {
    60
}

fn default_success_threshold() -> u32 {
    2
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Self>(vars).context("Invalid or missing environment variable")
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            attempts: self.job_attempts,
            backoff: RetryConfig {
                max_attempts: self.job_attempts,
                initial_delay_ms: self.job_backoff_initial_ms,
                max_delay_ms: self.job_backoff_max_ms,
                backoff_multiplier: self.job_backoff_multiplier,
            },
            keep_completed: self.keep_completed_jobs,
            keep_failed: self.keep_failed_jobs,
        }
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_seconds)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }

    pub fn queue_clean_interval(&self) -> Duration {
        Duration::from_secs(self.queue_clean_interval_seconds)
    }

    pub fn job_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.job_lock_timeout_seconds)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_check_interval_seconds)
    }
}
