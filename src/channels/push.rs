use async_trait::async_trait;
use tracing::debug;

use crate::{
    channels::ChannelAdapter,
    error::ChannelError,
    models::{
        event::Channel,
        notification::{DeliveryReceipt, Notification},
    },
};

pub const PUSH_PROVIDER: &str = "PUSH_GATEWAY";

/// Accepts every notification without sending anything. Mobile push is not wired yet.
#[derive(Debug, Default, Clone, Copy)]
pub struct PushChannel;

#[async_trait]
impl ChannelAdapter for PushChannel {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn provider(&self) -> &str {
        PUSH_PROVIDER
    }

    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, ChannelError> {
        debug!(notification_id = %notification.id, "Push delivery skipped, no gateway configured");

        Ok(DeliveryReceipt::default())
    }
}
