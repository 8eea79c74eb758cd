use sha2::{Digest, Sha256};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{config::Config, models::{event::Payload, retry::RetryConfig}};

pub const MAX_ERROR_LENGTH: usize = 500;

impl RetryConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            initial_delay_ms: config.initial_retry_delay_ms,
            max_delay_ms: config.max_retry_delay_ms,
            backoff_multiplier: config.retry_backoff_multiplier,
        }
    }
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);
                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = delay_ms
                    .saturating_mul(config.backoff_multiplier)
                    .min(config.max_delay_ms);
            }
        }
    }
}

/// Hex SHA-256 of the payload's JSON form. Object keys serialize sorted, so
/// equal payloads hash equally regardless of insertion order.
pub fn payload_hash(payload: &Payload) -> String {
    let canonical = serde_json::to_string(payload).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

pub fn dedup_key(tenant_id: &str, user_id: &str, event_type: &str, payload: &Payload) -> String {
    format!(
        "notif:d:{}:{}:{}:{}",
        tenant_id,
        user_id,
        event_type,
        payload_hash(payload)
    )
}

/// Cuts `error` to at most `max` characters.
pub fn truncate_error(error: &str, max: usize) -> String {
    match error.char_indices().nth(max) {
        Some((idx, _)) => error[..idx].to_string(),
        None => error.to_string(),
    }
}

/// Strips trailing slashes from a base URL.
pub fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"numero": "1", "cliente": "Acme"});
        let b = json!({"cliente": "Acme", "numero": "1"});
        assert_eq!(
            payload_hash(a.as_object().unwrap()),
            payload_hash(b.as_object().unwrap())
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ação".repeat(200);
        let cut = truncate_error(&text, MAX_ERROR_LENGTH);
        assert_eq!(cut.chars().count(), MAX_ERROR_LENGTH);
        assert_eq!(truncate_error("short", MAX_ERROR_LENGTH), "short");
    }
}
