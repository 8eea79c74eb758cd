use std::time::Duration;

use anyhow::{Result, bail};
use notification_dispatch::{
    models::event::{PublishRequest, Urgency},
    ports::JobQueue,
    service::PublishOutcome,
    worker::{NotificationWorker, WorkerConfig, WorkerEvent},
};
use serde_json::json;
use tokio::sync::broadcast::Receiver;

use crate::common::{Harness, TENANT, instant_retry_options};

fn worker(h: &Harness) -> NotificationWorker {
    NotificationWorker::new(
        h.service.clone(),
        h.queue.clone(),
        WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
        },
    )
}

fn request(user_id: &str, numero: &str) -> PublishRequest {
    PublishRequest::new(
        "processo.created",
        TENANT,
        user_id,
        json!({"numero": numero, "cliente": "Acme"}),
    )
    .with_urgency(Urgency::High)
}

/// Collects events until `count` of them match `wanted`.
async fn collect(
    rx: &mut Receiver<WorkerEvent>,
    count: usize,
    wanted: impl Fn(&WorkerEvent) -> bool,
) -> Result<Vec<WorkerEvent>> {
    let mut matched = Vec::new();

    while matched.len() < count {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Ok(event)) if wanted(&event) => matched.push(event),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => bail!("event channel closed: {}", e),
            Err(_) => bail!("timed out waiting for worker events, got {:?}", matched),
        }
    }

    Ok(matched)
}

/// Test: Queued notifications are processed and reported as completed
#[tokio::test]
async fn test_worker_processes_queued_jobs() -> Result<()> {
    let h = Harness::new();
    h.service.publish_notification(request("u1", "1")).await?;
    h.service.publish_notification(request("u2", "2")).await?;

    let worker = worker(&h);
    let mut events = worker.subscribe();
    worker.start();

    let ready = collect(&mut events, 1, |e| *e == WorkerEvent::Ready).await?;
    assert_eq!(ready, vec![WorkerEvent::Ready]);

    let completed = collect(&mut events, 2, |e| matches!(e, WorkerEvent::Completed { .. })).await?;
    assert_eq!(completed.len(), 2);

    worker.stop().await;

    assert_eq!(h.store.notifications().len(), 2);
    assert!(h.queue.is_closed());

    Ok(())
}

/// Test: Processing errors go through the queue's retry policy
#[tokio::test]
async fn test_worker_reports_retries_and_exhaustion() -> Result<()> {
    let h = Harness::with_job_options(instant_retry_options(2));
    h.store.set_fail_writes(true);
    h.service.publish_notification(request("u1", "1")).await?;

    let worker = worker(&h);
    let mut events = worker.subscribe();
    worker.start();

    let failures = collect(&mut events, 2, |e| matches!(e, WorkerEvent::Failed { .. })).await?;
    worker.stop().await;

    match (&failures[0], &failures[1]) {
        (
            WorkerEvent::Failed {
                attempts: 1,
                will_retry: true,
                error,
                ..
            },
            WorkerEvent::Failed {
                attempts: 2,
                will_retry: false,
                ..
            },
        ) => assert!(error.contains("store unavailable")),
        other => panic!("unexpected failure sequence: {:?}", other),
    }

    assert!(h.store.notifications().is_empty());

    Ok(())
}

/// Test: Stopping an idle worker returns promptly and closes the queue
#[tokio::test]
async fn test_stop_idle_worker() -> Result<()> {
    let h = Harness::new();
    let worker = worker(&h);
    worker.start();

    tokio::time::timeout(Duration::from_secs(2), worker.stop()).await?;

    assert!(h.queue.is_closed());
    assert!(h.queue.stats().await.is_err());

    Ok(())
}

/// Test: Stopping waits for the job already being delivered
#[tokio::test]
async fn test_stop_drains_in_flight_job() -> Result<()> {
    let h = Harness::new();
    h.realtime.set_delay(Duration::from_millis(300));

    let PublishOutcome::Enqueued { job_id, .. } =
        h.service.publish_notification(request("u1", "1")).await?
    else {
        bail!("expected the job to be enqueued");
    };

    let worker = worker(&h);
    let mut events = worker.subscribe();
    worker.start();

    let claimed = tokio::time::timeout(Duration::from_secs(2), async {
        while h.queue.stats().await?.active == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        anyhow::Ok(())
    })
    .await;
    assert!(matches!(claimed, Ok(Ok(()))));

    worker.stop().await;

    assert_eq!(h.realtime.published().len(), 1);
    assert_eq!(h.store.notifications().len(), 1);

    let completed = collect(&mut events, 1, |e| matches!(e, WorkerEvent::Completed { .. })).await?;
    assert_eq!(completed, vec![WorkerEvent::Completed { job_id }]);

    Ok(())
}

/// Test: No more jobs than the configured concurrency run at once
#[tokio::test]
async fn test_concurrency_is_bounded() -> Result<()> {
    let h = Harness::new();
    h.realtime.set_delay(Duration::from_millis(50));

    for (user_id, numero) in [("u1", "1"), ("u1", "2"), ("u1", "3"), ("u2", "4"), ("u2", "5"), ("u2", "6")] {
        h.service.publish_notification(request(user_id, numero)).await?;
    }

    let worker = worker(&h);
    let mut events = worker.subscribe();
    worker.start();

    let completed = collect(&mut events, 6, |e| matches!(e, WorkerEvent::Completed { .. })).await?;
    assert_eq!(completed.len(), 6);

    worker.stop().await;

    assert_eq!(h.realtime.published().len(), 6);
    assert_eq!(h.realtime.max_in_flight(), 2);

    Ok(())
}
