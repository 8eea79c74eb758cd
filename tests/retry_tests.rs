use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, anyhow};
use notification_dispatch::{
    clients::memory::InMemoryDedupStore,
    models::{event::Payload, retry::RetryConfig},
    ports::DedupStore,
    utils::{dedup_key, retry_with_backoff, truncate_error},
};
use serde_json::json;
use tokio::time::Instant;

fn config(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2,
    }
}

/// Test: Transient failures are retried until the call succeeds
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(5, 20, 200), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("503 Service Unavailable"))
            } else {
                Ok("msg-1")
            }
        }
    })
    .await?;

    assert_eq!(result, "msg-1");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Permanent failures stop after max_attempts and return the last error
#[tokio::test]
async fn test_permanent_failure_exhausts_attempts() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(4, 10, 100), || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(anyhow!("attempt {} failed", n))
        }
    })
    .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(
        result.map_err(|e| e.to_string()),
        Err("attempt 4 failed".to_string())
    );

    Ok(())
}

/// Test: Delays between attempts double, within jitter, up to the cap
#[tokio::test]
async fn test_backoff_doubles_and_is_capped() -> Result<()> {
    let retry = config(5, 100, 250);
    let start = Instant::now();
    let times = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let recorder = Arc::clone(&times);

    let _ = retry_with_backoff(&retry, || {
        let recorder = Arc::clone(&recorder);
        async move {
            recorder.lock().await.push(start.elapsed().as_millis());
            Err::<(), _>(anyhow!("fail"))
        }
    })
    .await;

    let times = times.lock().await;
    assert_eq!(times.len(), 5);

    // 100, 200, 250, 250 with up to 10% jitter
    let expected = [100u128, 200, 250, 250];
    for (i, base) in expected.iter().enumerate() {
        let delay = times[i + 1] - times[i];
        assert!(
            delay >= base * 85 / 100 && delay <= base * 130 / 100,
            "delay {} was {}ms, expected about {}ms",
            i + 1,
            delay,
            base
        );
    }

    Ok(())
}

/// Test: Queue backoff per attempt follows the same curve without jitter
#[test]
fn test_delay_for_attempt() {
    let retry = config(3, 2_000, 60_000);

    assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
    assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(4));
    assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(8));
    assert_eq!(retry.delay_for_attempt(40), Duration::from_secs(60));
}

/// Test: Dedup keys are scoped by tenant, user and type and ignore key order
#[test]
fn test_dedup_key_shape() {
    let a: Payload = json!({"numero": "1", "cliente": "Acme"})
        .as_object()
        .cloned()
        .unwrap_or_default();
    let b: Payload = json!({"cliente": "Acme", "numero": "1"})
        .as_object()
        .cloned()
        .unwrap_or_default();

    let key = dedup_key("t1", "u1", "processo.created", &a);
    assert!(key.starts_with("notif:d:t1:u1:processo.created:"));
    assert_eq!(key.rsplit(':').next().map(str::len), Some(64));
    assert_eq!(key, dedup_key("t1", "u1", "processo.created", &b));
    assert_ne!(key, dedup_key("t1", "u2", "processo.created", &a));
}

/// Test: Expired dedup keys are swept and can be claimed again
#[tokio::test]
async fn test_in_memory_dedup_sweeps_expired_keys() -> Result<()> {
    let dedup = InMemoryDedupStore::new();
    let ttl = Duration::from_millis(20);

    assert!(dedup.set_if_absent("notif:d:a", ttl).await?);
    assert!(!dedup.set_if_absent("notif:d:a", ttl).await?);
    assert!(dedup.set_if_absent("notif:d:b", ttl).await?);
    assert_eq!(dedup.len(), 2);

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(dedup.set_if_absent("notif:d:a", Duration::from_secs(60)).await?);
    assert_eq!(dedup.len(), 1);

    Ok(())
}

/// Test: Error truncation respects character boundaries
#[test]
fn test_truncate_error_on_multibyte_text() {
    let text = "ação".repeat(200);
    let truncated = truncate_error(&text, 500);

    assert_eq!(truncated.chars().count(), 500);
    assert_eq!(truncate_error("short", 500), "short");
}
