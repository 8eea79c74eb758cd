#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use notification_dispatch::{
    channels::{ChannelRegistry, EmailChannel, PushChannel, RealtimeChannel},
    clients::memory::{
        InMemoryDedupStore, InMemoryJobQueue, InMemoryStore, RecordingEmailTransport,
        RecordingRealtimeTransport,
    },
    domain::strategy::StrategyRegistry,
    models::{
        event::{Channel, Urgency},
        job::JobOptions,
        preference::NotificationPreference,
        retry::RetryConfig,
        user::{Tenant, User},
    },
    ports::JobQueue,
    service::{NotificationService, ProcessOutcome, ServiceSettings},
};

pub const TENANT: &str = "t1";
pub const OTHER_TENANT: &str = "t2";
pub const APP_BASE_URL: &str = "https://app.example.com";

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub dedup: Arc<InMemoryDedupStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub realtime: Arc<RecordingRealtimeTransport>,
    pub email: Arc<RecordingEmailTransport>,
    pub service: Arc<NotificationService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_job_options(JobOptions::default())
    }

    pub fn with_job_options(options: JobOptions) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let dedup = Arc::new(InMemoryDedupStore::new());
        let queue = Arc::new(InMemoryJobQueue::new(options));
        let realtime = Arc::new(RecordingRealtimeTransport::new());
        let email = Arc::new(RecordingEmailTransport::new());
        let strategies = Arc::new(StrategyRegistry::default());

        seed(&store);

        let channels = ChannelRegistry::new()
            .with(Arc::new(RealtimeChannel::new(realtime.clone())))
            .with(Arc::new(EmailChannel::new(
                store.clone(),
                email.clone(),
                strategies.clone(),
                APP_BASE_URL,
            )))
            .with(Arc::new(PushChannel));

        let service = Arc::new(NotificationService::new(
            store.clone(),
            dedup.clone(),
            queue.clone(),
            channels,
            strategies,
            ServiceSettings::default(),
        ));

        Self {
            store,
            dedup,
            queue,
            realtime,
            email,
            service,
        }
    }

    /// Runs every ready job through the service, as a worker would.
    pub async fn drain(&self) -> Result<Vec<ProcessOutcome>> {
        let mut outcomes = Vec::new();

        while let Some(job) = self.queue.reserve().await? {
            let outcome = self.service.process_sync(&job.data).await?;
            self.queue.complete(&job).await?;
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

/// Tenant t1 (slug "acme") with two active lawyers, an inactive lawyer and a
/// secretary; tenant t2 with one lawyer.
fn seed(store: &InMemoryStore) {
    store.add_tenant(Tenant {
        id: TENANT.to_string(),
        slug: Some("acme".to_string()),
        domain: None,
        custom_domain: None,
    });

    store.add_user(user("u1", TENANT, "ADVOGADO"));
    store.add_user(user("u2", TENANT, "ADVOGADO"));
    store.add_user(User {
        active: false,
        ..user("u3", TENANT, "ADVOGADO")
    });
    store.add_user(user("u4", TENANT, "SECRETARIA"));
    store.add_user(user("u5", OTHER_TENANT, "ADVOGADO"));
}

pub fn user(id: &str, tenant_id: &str, role: &str) -> User {
    User {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        active: true,
        email: Some(format!("{}@example.com", id)),
        first_name: Some("Ana".to_string()),
        last_name: Some("Silva".to_string()),
        role: role.to_string(),
    }
}

pub fn preference(
    user_id: &str,
    event_type: &str,
    enabled: bool,
    channels: &[Channel],
    urgency: Urgency,
) -> NotificationPreference {
    NotificationPreference {
        tenant_id: TENANT.to_string(),
        user_id: user_id.to_string(),
        event_type: event_type.to_string(),
        enabled,
        channels: channels.to_vec(),
        urgency,
    }
}

/// Retries become due immediately.
pub fn instant_retry_options(attempts: u32) -> JobOptions {
    JobOptions {
        attempts,
        backoff: RetryConfig {
            max_attempts: attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 2,
        },
        keep_completed: 100,
        keep_failed: 50,
    }
}
