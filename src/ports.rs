//! Collaborator interfaces the pipeline depends on. Production adapters live in
//! `clients`, in-memory ones in `clients::memory`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{
    event::NotificationEvent,
    job::{JobFailure, QueueJob, QueueStats},
    notification::{
        DeliveryCounts, DeliveryUpdate, NewDelivery, NewNotification, Notification,
        NotificationDelivery,
    },
    preference::NotificationPreference,
    template::NotificationTemplate,
    user::{Tenant, User},
};

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// The user only if it belongs to `tenant_id` and is active.
    async fn find_active_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<User>>;

    async fn find_user(&self, user_id: &str) -> Result<Option<User>>;

    async fn find_active_users_by_role(&self, tenant_id: &str, role: &str) -> Result<Vec<User>>;

    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    async fn find_preference(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationPreference>>;

    /// All rows whose event type is one of `event_types`, in no particular order.
    async fn find_preferences(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_types: &[String],
    ) -> Result<Vec<NotificationPreference>>;

    async fn find_template(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationTemplate>>;

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification>;

    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<NotificationDelivery>;

    async fn update_delivery(&self, delivery_id: Uuid, update: DeliveryUpdate) -> Result<()>;

    /// Notification and delivery totals for one tenant.
    async fn delivery_counts(&self, tenant_id: &str) -> Result<DeliveryCounts>;

    async fn ping(&self) -> Result<()>;
}

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Atomically stores `key` for `ttl` unless present. `true` when this call set it.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Priority 1 is served first. `None` derives it from the event urgency.
    async fn add_job(&self, data: &NotificationEvent, priority: Option<u8>) -> Result<String>;

    async fn add_scheduled_job(&self, data: &NotificationEvent, delay: Duration) -> Result<String>;

    /// Registers a cron-driven job. Returns the recurring definition key.
    async fn add_recurring_job(&self, data: &NotificationEvent, pattern: &str) -> Result<String>;

    /// Claims the next ready job, or `None` when nothing is ready or the queue is paused.
    async fn reserve(&self) -> Result<Option<QueueJob>>;

    async fn complete(&self, job: &QueueJob) -> Result<()>;

    async fn fail(&self, job: &QueueJob, error: &str) -> Result<JobFailure>;

    /// Active jobs claimed more than `lock_timeout` ago are failed as stalled,
    /// which consumes an attempt. Returns how many were recovered.
    async fn recover_stalled(&self, lock_timeout: Duration) -> Result<u64>;

    async fn stats(&self) -> Result<QueueStats>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Purges expired history. Returns how many jobs were removed.
    async fn clean_old_jobs(&self) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMessage {
    pub tenant_id: String,
    pub user_id: String,
    pub payload: JsonValue,
}

#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn publish(&self, event_name: &str, message: RealtimeMessage) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionalEmail {
    pub to: String,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub title: String,
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_link: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSendResult {
    pub success: bool,

    #[serde(default)]
    pub message_id: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn send_transactional_email(
        &self,
        tenant_id: &str,
        email: TransactionalEmail,
    ) -> Result<EmailSendResult>;
}
