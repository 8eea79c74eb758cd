//! Run with `cargo test -- --ignored`; needs a local Docker daemon.

use std::{sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use notification_dispatch::{
    clients::{
        circuit_breaker::CircuitBreaker,
        queue::RedisJobQueue,
        redis::{RedisConnection, RedisDedupStore},
    },
    models::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        event::{NotificationEvent, Payload, Urgency},
        job::{JobFailure, STALLED_JOB_ERROR},
        retry::RetryConfig,
        status::JobState,
    },
    ports::{DedupStore, JobQueue},
};
use serde_json::json;
use testcontainers::{
    ContainerAsync, GenericImage,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

use crate::common::instant_retry_options;

async fn start_redis() -> Result<(ContainerAsync<GenericImage>, String, Arc<RedisConnection>)> {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await?;

    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(6379).await?;

    let url = format!("redis://{}:{}", host, port);
    let redis = RedisConnection::new(
        &url,
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            backoff_multiplier: 2,
        },
    )?;

    Ok((container, url, Arc::new(redis)))
}

fn event(user_id: &str, urgency: Urgency) -> NotificationEvent {
    let mut payload = Payload::new();
    payload.insert("numero".to_string(), json!("1"));

    NotificationEvent {
        event_type: "processo.updated".to_string(),
        tenant_id: "t1".to_string(),
        user_id: user_id.to_string(),
        payload,
        urgency,
        channels: None,
    }
}

/// Test: SET NX PX lets only the first writer through until expiry
#[tokio::test]
#[ignore = "requires docker"]
async fn test_dedup_store_set_if_absent() -> Result<()> {
    let (_container, _, redis) = start_redis().await?;
    let dedup = RedisDedupStore::new(redis);

    let ttl = Duration::from_millis(300);
    assert!(dedup.set_if_absent("notif:d:test", ttl).await?);
    assert!(!dedup.set_if_absent("notif:d:test", ttl).await?);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(dedup.set_if_absent("notif:d:test", ttl).await?);

    Ok(())
}

/// Test: The Redis queue serves by priority and retries failed jobs
#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_queue_priority_and_retry() -> Result<()> {
    let (_container, _, redis) = start_redis().await?;
    let queue = RedisJobQueue::new(redis, "test-notifications", instant_retry_options(2));

    queue.add_job(&event("medium", Urgency::Medium), None).await?;
    queue.add_job(&event("critical", Urgency::Critical), None).await?;

    let first = queue.reserve().await?.ok_or_else(|| anyhow!("no job"))?;
    assert_eq!(first.data.user_id, "critical");
    assert_eq!(first.state, JobState::Active);

    let failure = queue.fail(&first, "boom").await?;
    assert!(failure.will_retry());

    // The retried critical job outranks the waiting medium one
    let retried = queue.reserve().await?.ok_or_else(|| anyhow!("no job"))?;
    assert_eq!(retried.id, first.id);
    assert_eq!(queue.fail(&retried, "boom").await?, JobFailure::Exhausted { attempts: 2 });

    let second = queue.reserve().await?.ok_or_else(|| anyhow!("no job"))?;
    queue.complete(&second).await?;

    let stats = queue.stats().await?;
    assert_eq!((stats.completed, stats.failed, stats.waiting), (1, 1, 0));

    queue.pause().await?;
    queue.add_job(&event("later", Urgency::Info), None).await?;
    assert!(queue.reserve().await?.is_none());
    queue.resume().await?;
    assert!(queue.reserve().await?.is_some());

    queue.close().await?;
    assert!(queue.add_job(&event("closed", Urgency::Info), None).await.is_err());

    Ok(())
}

/// Test: The breaker opens after the failure threshold and rejects calls
#[tokio::test]
#[ignore = "requires docker"]
async fn test_circuit_breaker_opens_after_failures() -> Result<()> {
    let (_container, _, redis) = start_redis().await?;
    let breaker = CircuitBreaker::new(
        "email_service",
        redis,
        CircuitBreakerConfig {
            failure_threshold: 2,
            timeout_seconds: 60,
            success_threshold: 1,
        },
    );

    for _ in 0..2 {
        let result: Result<()> = breaker.call(|| async { Err(anyhow!("down")) }).await;
        assert!(result.is_err());
    }

    assert_eq!(breaker.state().await?, CircuitState::Open);

    let rejected: Result<()> = breaker.call(|| async { Ok(()) }).await;
    assert!(
        rejected
            .map_err(|e| e.to_string())
            .is_err_and(|e| e.contains("Circuit breaker is open"))
    );

    Ok(())
}

/// Test: A job claimed but never finished goes back through the retry path
#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_stalled_job_is_requeued() -> Result<()> {
    let (_container, _, redis) = start_redis().await?;
    let queue = RedisJobQueue::new(redis, "test-stalled", instant_retry_options(2));

    let id = queue.add_job(&event("u1", Urgency::High), None).await?;
    let claimed = queue.reserve().await?.ok_or_else(|| anyhow!("no job"))?;
    assert_eq!(claimed.id, id);
    assert_eq!(queue.stats().await?.active, 1);
    assert_eq!(queue.recover_stalled(Duration::from_secs(60)).await?, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.recover_stalled(Duration::from_millis(10)).await?, 1);

    let retried = queue.reserve().await?.ok_or_else(|| anyhow!("no job"))?;
    assert_eq!(retried.id, id);
    assert_eq!(retried.attempts_made, 1);
    assert_eq!(retried.failed_reason.as_deref(), Some(STALLED_JOB_ERROR));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.recover_stalled(Duration::from_millis(10)).await?, 1);

    let stats = queue.stats().await?;
    assert_eq!((stats.active, stats.failed, stats.waiting), (0, 1, 0));

    Ok(())
}

/// Test: Commands succeed again after the server drops every client connection
#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_reconnects_after_connection_loss() -> Result<()> {
    let (_container, url, redis) = start_redis().await?;
    let dedup = RedisDedupStore::new(redis);
    let ttl = Duration::from_secs(60);

    assert!(dedup.set_if_absent("notif:d:before", ttl).await?);

    let admin = redis::Client::open(url.as_str())?;
    let mut admin_conn = admin.get_multiplexed_async_connection().await?;
    let killed: u64 = redis::cmd("CLIENT")
        .arg("KILL")
        .arg("TYPE")
        .arg("normal")
        .arg("SKIPME")
        .arg("yes")
        .query_async(&mut admin_conn)
        .await?;
    assert!(killed >= 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let stored = loop {
        match dedup.set_if_absent("notif:d:after", ttl).await {
            Ok(stored) => break stored,
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => return Err(e),
        }
    };
    assert!(stored);

    Ok(())
}
