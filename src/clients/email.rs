use std::{sync::Arc, time::Duration};

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    models::retry::RetryConfig,
    ports::{EmailSendResult, EmailTransport, TransactionalEmail},
    utils::{retry_with_backoff, trim_base_url},
};

pub const EMAIL_PROVIDER: &str = "EMAIL_SERVICE";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    tenant_id: &'a str,
    #[serde(flatten)]
    email: &'a TransactionalEmail,
}

/// Client for the transactional email service. Provider-level rejections come
/// back as `success: false` results; only transport faults are errors.
pub struct HttpEmailTransport {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
    retry_config: RetryConfig,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl HttpEmailTransport {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        retry_config: RetryConfig,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!("{}/api/v1/emails/transactional", trim_base_url(base_url));
        info!(endpoint = %endpoint, "Email service client initialized");

        Ok(Self {
            http_client,
            endpoint,
            api_key,
            retry_config,
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    async fn send_with_retry(&self, body: Vec<u8>) -> Result<EmailSendResult, Error> {
        retry_with_backoff(&self.retry_config, || {
            let mut request = self
                .http_client
                .post(&self.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());

            if let Some(api_key) = &self.api_key {
                request = request.header("X-Api-Key", api_key);
            }

            async move {
                let response = request.send().await.map_err(|e| e.to_string())?;
                let status = response.status();

                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(format!("Email service returned status {}", status));
                }

                let text = response.text().await.map_err(|e| e.to_string())?;

                if status.is_success() {
                    return serde_json::from_str::<EmailSendResult>(&text)
                        .map_err(|e| format!("Failed to parse email service response: {}", e));
                }

                Ok(serde_json::from_str::<EmailSendResult>(&text).unwrap_or_else(|_| {
                    EmailSendResult {
                        success: false,
                        message_id: None,
                        error: Some(format!("Email service returned status {}", status)),
                    }
                }))
            }
        })
        .await
        .map_err(|e| anyhow!("Email service request failed: {}", e))
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    fn provider(&self) -> &'static str {
        EMAIL_PROVIDER
    }

    async fn send_transactional_email(
        &self,
        tenant_id: &str,
        email: TransactionalEmail,
    ) -> Result<EmailSendResult> {
        let body = serde_json::to_vec(&SendEmailRequest {
            tenant_id,
            email: &email,
        })?;

        debug!(tenant_id, event_type = %email.event_type, "Sending transactional email");

        let result = match &self.circuit_breaker {
            Some(breaker) => breaker.call(|| self.send_with_retry(body)).await?,
            None => self.send_with_retry(body).await?,
        };

        if !result.success {
            warn!(
                tenant_id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Email service rejected message"
            );
        }

        Ok(result)
    }
}
