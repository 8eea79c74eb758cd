use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{
    event::{Channel, Payload, Urgency},
    status::DeliveryStatus,
};

/// Persisted notification. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub payload: Payload,
    pub urgency: Urgency,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub tenant_id: String,
    pub user_id: String,
    pub event_type: String,
    pub title: String,
    pub message: String,
    pub payload: Payload,
    pub urgency: Urgency,
    pub channels: Vec<Channel>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn into_notification(self, id: Uuid) -> Notification {
        Notification {
            id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            event_type: self.event_type,
            title: self.title,
            message: self.message,
            payload: self.payload,
            urgency: self.urgency,
            channels: self.channels,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// One row per (notification, channel).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDelivery {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: Channel,
    pub provider: String,
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub notification_id: Uuid,
    pub channel: Channel,
    pub provider: String,
}

impl NewDelivery {
    pub fn into_pending(self, id: Uuid) -> NotificationDelivery {
        NotificationDelivery {
            id,
            notification_id: self.notification_id,
            channel: self.channel,
            provider: self.provider,
            status: DeliveryStatus::Pending,
            provider_message_id: None,
            error_message: None,
            metadata: None,
        }
    }
}

/// Terminal transition for a delivery row.
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl DeliveryUpdate {
    pub fn sent(provider_message_id: Option<String>, metadata: Option<JsonValue>) -> Self {
        Self {
            status: DeliveryStatus::Sent,
            provider_message_id,
            error_message: None,
            metadata,
        }
    }

    pub fn failed(error_message: String, provider_message_id: Option<String>) -> Self {
        Self {
            status: DeliveryStatus::Failed,
            provider_message_id,
            error_message: Some(error_message),
            metadata: None,
        }
    }
}

/// What a channel adapter reports on success.
#[derive(Debug, Clone, Default)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub channel: Channel,
    pub status: DeliveryStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tenant-wide totals. `pending` counts notifications with no SENT delivery,
/// `sent` and `failed` count delivery rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCounts {
    pub total: u64,
    #[serde(rename = "recent24h")]
    pub recent_24h: u64,
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
}

impl DeliveryCounts {
    /// Percentage of terminal deliveries that were sent, 0 when none finished.
    pub fn success_rate(&self) -> f64 {
        let finished = self.sent + self.failed;
        if finished == 0 {
            return 0.0;
        }
        self.sent as f64 / finished as f64 * 100.0
    }
}
