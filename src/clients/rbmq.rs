use std::time::Duration;

use anyhow::{Context, Error, Result, bail};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions},
    types::FieldTable,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{
    clients::health::HealthProbe,
    models::health::DependencyHealth,
    ports::{RealtimeMessage, RealtimeTransport},
};

pub const REALTIME_PROVIDER: &str = "RABBITMQ";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeEnvelope<'a> {
    event: &'a str,
    tenant_id: &'a str,
    user_id: &'a str,
    payload: &'a JsonValue,
}

/// Publishes realtime events to a topic exchange. Gateways bind per tenant or
/// user with routing keys `<event>.<tenant>.<user>`.
pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str, exchange: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        let channel = connection
            .create_channel()
            .await
            .context("RabbitMQ channel creation failed")?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")?;

        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare realtime exchange")?;

        info!(exchange, "RabbitMQ realtime exchange declared");

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn routing_key(event_name: &str, message: &RealtimeMessage) -> String {
        format!("{}.{}.{}", event_name, message.tenant_id, message.user_id)
    }
}

#[async_trait]
impl RealtimeTransport for RabbitMqClient {
    fn provider(&self) -> &'static str {
        REALTIME_PROVIDER
    }

    async fn publish(&self, event_name: &str, message: RealtimeMessage) -> Result<()> {
        let routing_key = Self::routing_key(event_name, &message);
        let body = serde_json::to_vec(&RealtimeEnvelope {
            event: event_name,
            tenant_id: &message.tenant_id,
            user_id: &message.user_id,
            payload: &message.payload,
        })?;

        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .context("Failed to publish realtime event")?
            .await
            .context("Realtime publish was not confirmed")?;

        if confirmation.is_nack() {
            bail!("Broker rejected realtime event {}", routing_key);
        }

        debug!(routing_key = %routing_key, "Realtime event published");
        Ok(())
    }
}

#[async_trait]
impl HealthProbe for RabbitMqClient {
    fn name(&self) -> &str {
        "message_broker"
    }

    async fn check(&self) -> DependencyHealth {
        if self.connection.status().connected() {
            DependencyHealth::up(Duration::ZERO)
        } else {
            warn!("RabbitMQ connection is not open");
            DependencyHealth::down("Connection is not open")
        }
    }
}
