//! Channel adapters. Each turns a persisted notification into one delivery
//! attempt and reports the outcome instead of panicking or retrying.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::ChannelError,
    models::{event::Channel, notification::{DeliveryReceipt, Notification}},
};

pub mod email;
pub mod push;
pub mod realtime;

pub use email::EmailChannel;
pub use push::PushChannel;
pub use realtime::RealtimeChannel;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Recorded on the delivery row.
    fn provider(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, ChannelError>;
}

#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }
}
