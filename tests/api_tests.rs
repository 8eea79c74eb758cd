use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use notification_dispatch::{
    api::{AppState, router},
    clients::{health::HealthChecker, memory::EmailBehavior},
    models::event::{PublishRequest, Urgency},
};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::common::{Harness, OTHER_TENANT, TENANT};

async fn serve(h: &Harness) -> Result<SocketAddr> {
    let state = Arc::new(AppState {
        service: h.service.clone(),
        queue: h.queue.clone(),
        health_checker: HealthChecker::new(Vec::new()).with_queue(h.queue.clone()),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move { axum::serve(listener, router(state)).await });

    Ok(addr)
}

/// Test: A valid event is accepted and enqueued with its priority
#[tokio::test]
async fn test_publish_endpoint_accepts_event() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/notifications", addr))
        .json(&json!({
            "type": "processo.created",
            "tenantId": TENANT,
            "userId": "u1",
            "payload": {"numero": "0001", "cliente": "Acme"},
            "urgency": "HIGH"
        }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: Value = response.json().await?;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["outcome"], json!("enqueued"));
    assert_eq!(body["data"]["priority"], json!(2));

    Ok(())
}

/// Test: Validation failures map to 422 with the reason
#[tokio::test]
async fn test_publish_endpoint_rejects_invalid_event() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/notifications", addr))
        .json(&json!({
            "type": "processo.created",
            "tenantId": TENANT,
            "userId": "u1",
            "payload": {"cliente": "Acme"}
        }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = response.json().await?;
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap_or_default().contains("numero"));

    Ok(())
}

/// Test: Fan-out to users reports one result per recipient
#[tokio::test]
async fn test_publish_to_users_endpoint() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/notifications/users", addr))
        .json(&json!({
            "type": "tarefa.assigned",
            "tenantId": TENANT,
            "userIds": ["u1", "u2"],
            "payload": {
                "tarefaId": "tf-1",
                "titulo": "Revisar petição",
                "responsavelId": "u1",
                "responsavelNome": "Ana"
            }
        }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: Value = response.json().await?;
    let results = body["data"].as_array().cloned().unwrap_or_default();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1]["userId"], json!("u2"));

    Ok(())
}

/// Test: Queue statistics and pause/resume are exposed over HTTP
#[tokio::test]
async fn test_queue_endpoints() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;
    let client = reqwest::Client::new();

    client
        .post(format!("http://{}/api/v1/notifications/role", addr))
        .json(&json!({
            "type": "processo.created",
            "tenantId": TENANT,
            "role": "ADVOGADO",
            "payload": {"numero": "0001", "cliente": "Acme"}
        }))
        .send()
        .await?
        .error_for_status()?;

    let stats: Value = client
        .get(format!("http://{}/api/v1/queue/stats", addr))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["data"]["waiting"], json!(2));

    let paused = client
        .post(format!("http://{}/api/v1/queue/pause", addr))
        .send()
        .await?;
    assert_eq!(paused.status(), StatusCode::OK);
    assert!(h.drain().await?.is_empty());

    client
        .post(format!("http://{}/api/v1/queue/resume", addr))
        .send()
        .await?
        .error_for_status()?;
    assert_eq!(h.drain().await?.len(), 2);

    let cleaned: Value = client
        .post(format!("http://{}/api/v1/queue/clean", addr))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(cleaned["data"]["removed"], json!(0));

    Ok(())
}

/// Test: Health reports healthy with queue counts when no probe fails
#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;

    let response = reqwest::get(format!("http://{}/health", addr)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    assert_eq!(body["status"], json!("healthy"));
    assert_eq!(body["queue"]["waiting"], json!(0));

    Ok(())
}

/// Test: Delivery metrics combine tenant delivery counts with queue statistics
#[tokio::test]
async fn test_notification_metrics_endpoint() -> Result<()> {
    let h = Harness::new();
    let addr = serve(&h).await?;

    let created = |user_id: &str| {
        PublishRequest::new(
            "processo.created",
            TENANT,
            user_id,
            json!({"numero": "0001", "cliente": "Acme"}),
        )
        .with_urgency(Urgency::High)
    };

    h.service.publish_notification(created("u1")).await?;
    h.drain().await?;

    h.email.set_behavior(EmailBehavior::Reject("mailbox full".to_string()));
    h.service.publish_notification(created("u2")).await?;
    h.drain().await?;

    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/api/v1/notifications/metrics?tenantId={}", addr, TENANT))
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    let overview = &body["data"]["overview"];
    assert_eq!(body["data"]["tenantId"], json!(TENANT));
    assert_eq!(overview["total"], json!(2));
    assert_eq!(overview["recent24h"], json!(2));
    assert_eq!(overview["pending"], json!(0));
    assert_eq!(overview["sent"], json!(3));
    assert_eq!(overview["failed"], json!(1));
    assert_eq!(overview["successRate"], json!("75.00%"));
    assert_eq!(body["data"]["queue"]["completed"], json!(2));

    let other: Value = client
        .get(format!("http://{}/api/v1/notifications/metrics?tenantId={}", addr, OTHER_TENANT))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(other["data"]["overview"]["total"], json!(0));
    assert_eq!(other["data"]["overview"]["successRate"], json!("0.00%"));

    let blank = client
        .get(format!("http://{}/api/v1/notifications/metrics?tenantId=", addr))
        .send()
        .await?;
    assert_eq!(blank.status(), StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}
