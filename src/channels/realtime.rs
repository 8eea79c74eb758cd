use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    channels::ChannelAdapter,
    error::ChannelError,
    models::{
        event::Channel,
        notification::{DeliveryReceipt, Notification},
    },
    ports::{RealtimeMessage, RealtimeTransport},
};

pub const NEW_NOTIFICATION_EVENT: &str = "notification.new";

pub struct RealtimeChannel {
    transport: Arc<dyn RealtimeTransport>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl ChannelAdapter for RealtimeChannel {
    fn channel(&self) -> Channel {
        Channel::Realtime
    }

    fn provider(&self) -> &str {
        self.transport.provider()
    }

    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, ChannelError> {
        let payload = serde_json::to_value(notification)
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        self.transport
            .publish(
                NEW_NOTIFICATION_EVENT,
                RealtimeMessage {
                    tenant_id: notification.tenant_id.clone(),
                    user_id: notification.user_id.clone(),
                    payload,
                },
            )
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        debug!(notification_id = %notification.id, "Realtime notification published");

        Ok(DeliveryReceipt {
            message_id: Some(notification.id.to_string()),
            metadata: None,
        })
    }
}
