use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    clients::health::HealthChecker,
    error::{PublishError, ValidationError},
    models::{
        event::{EventOptions, PublishRequest},
        health::HealthStatus,
        response::ApiResponse,
    },
    ports::JobQueue,
    service::NotificationService,
};

pub struct AppState {
    pub service: Arc<NotificationService>,
    pub queue: Arc<dyn JobQueue>,
    pub health_checker: HealthChecker,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishToUsersRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    pub user_ids: Vec<String>,
    pub payload: Value,

    #[serde(default)]
    pub urgency: Option<String>,

    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishToRoleRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    pub role: String,
    pub payload: Value,

    #[serde(default)]
    pub urgency: Option<String>,

    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub tenant_id: String,
}

enum ApiError {
    Publish(PublishError),
    Internal(anyhow::Error),
}

impl From<PublishError> for ApiError {
    fn from(e: PublishError) -> Self {
        ApiError::Publish(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Publish(PublishError::Validation(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                e.to_string(),
                "Notification rejected".to_string(),
            ),
            ApiError::Publish(e) => {
                error!(error = %e, "Publish failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                    "Notification could not be processed".to_string(),
                )
            }
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                    "Internal error".to_string(),
                )
            }
        };

        (status, Json(ApiResponse::<()>::error(error, message))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications", post(publish_notification))
        .route("/api/v1/notifications/users", post(publish_to_users))
        .route("/api/v1/notifications/role", post(publish_to_role))
        .route("/api/v1/notifications/metrics", get(notification_metrics))
        .route("/api/v1/queue/stats", get(queue_stats))
        .route("/api/v1/queue/pause", post(pause_queue))
        .route("/api/v1/queue/resume", post(resume_queue))
        .route("/api/v1/queue/clean", post(clean_queue))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    port: u16,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn publish_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.service.publish_notification(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(outcome, "Notification accepted".to_string())),
    ))
}

async fn publish_to_users(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishToUsersRequest>,
) -> impl IntoResponse {
    let options = EventOptions {
        urgency: request.urgency,
        channels: request.channels,
    };

    let results = state
        .service
        .publish_to_multiple_users(
            &request.event_type,
            &request.tenant_id,
            &request.user_ids,
            &request.payload,
            &options,
        )
        .await;

    (
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(
            results,
            format!("Published to {} users", request.user_ids.len()),
        )),
    )
}

async fn publish_to_role(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PublishToRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let options = EventOptions {
        urgency: request.urgency,
        channels: request.channels,
    };

    let results = state
        .service
        .publish_to_role(
            &request.event_type,
            &request.tenant_id,
            &request.role,
            &request.payload,
            &options,
        )
        .await?;

    let message = format!("Published to {} users with role {}", results.len(), request.role);

    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(results, message))))
}

async fn notification_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.tenant_id.trim().is_empty() {
        return Err(PublishError::from(ValidationError::EmptyTenantId).into());
    }

    let counts = state.service.delivery_counts(&query.tenant_id).await?;
    let queue = state.queue.stats().await?;

    let metrics = json!({
        "tenantId": query.tenant_id,
        "overview": {
            "total": counts.total,
            "recent24h": counts.recent_24h,
            "pending": counts.pending,
            "sent": counts.sent,
            "failed": counts.failed,
            "successRate": format!("{:.2}%", counts.success_rate()),
        },
        "queue": queue,
        "timestamp": Utc::now().to_rfc3339(),
    });

    Ok(Json(ApiResponse::success(metrics, "Notification metrics".to_string())))
}

async fn queue_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = state.queue.stats().await?;

    Ok(Json(ApiResponse::success(stats, "Queue statistics".to_string())))
}

async fn pause_queue(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.queue.pause().await?;
    info!("Queue paused");

    Ok(Json(ApiResponse::success(json!({ "paused": true }), "Queue paused".to_string())))
}

async fn resume_queue(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.queue.resume().await?;
    info!("Queue resumed");

    Ok(Json(ApiResponse::success(json!({ "paused": false }), "Queue resumed".to_string())))
}

async fn clean_queue(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let removed = state.queue.clean_old_jobs().await?;
    info!(removed, "Old jobs cleaned");

    Ok(Json(ApiResponse::success(
        json!({ "removed": removed }),
        "Old jobs cleaned".to_string(),
    )))
}
