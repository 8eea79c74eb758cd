use std::time::Instant;

use anyhow::{Context, Error, Result, anyhow};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::health::HealthProbe,
    models::{
        event::{Channel, Urgency},
        health::DependencyHealth,
        notification::{
            DeliveryCounts, DeliveryUpdate, NewDelivery, NewNotification, Notification,
            NotificationDelivery,
        },
        preference::NotificationPreference,
        template::NotificationTemplate,
        user::{Tenant, User},
    },
    ports::NotificationStore,
};

const USER_COLUMNS: &str = "id, tenant_id, active, email, first_name, last_name, role";
const PREFERENCE_COLUMNS: &str = "tenant_id, user_id, event_type, enabled, channels, urgency";

pub struct PgStore {
    client: Client,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("Failed to connect to database")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection closed with error");
            }
        });

        info!("PostgreSQL connection established");

        Ok(Self { client })
    }

    /// Applies the bundled schema. Statements are idempotent.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.client
            .batch_execute(include_str!("../../migrations/0001_notifications.sql"))
            .await
            .context("Failed to apply schema")?;

        debug!("Database schema applied");
        Ok(())
    }
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        active: row.try_get("active")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        role: row.try_get("role")?,
    })
}

fn preference_from_row(row: &Row) -> Result<NotificationPreference> {
    let channels: Vec<String> = row.try_get("channels")?;
    let urgency: String = row.try_get("urgency")?;

    Ok(NotificationPreference {
        tenant_id: row.try_get("tenant_id")?,
        user_id: row.try_get("user_id")?,
        event_type: row.try_get("event_type")?,
        enabled: row.try_get("enabled")?,
        channels: parse_channels(&channels)?,
        urgency: urgency.parse::<Urgency>()?,
    })
}

fn parse_channels(raw: &[String]) -> Result<Vec<Channel>> {
    raw.iter()
        .map(|value| value.parse::<Channel>().map_err(Error::from))
        .collect()
}

fn channel_names(channels: &[Channel]) -> Vec<&'static str> {
    channels.iter().map(Channel::as_str).collect()
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn find_active_user(&self, tenant_id: &str, user_id: &str) -> Result<Option<User>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM users WHERE id = $1 AND tenant_id = $2 AND active",
                    USER_COLUMNS
                ),
                &[&user_id, &tenant_id],
            )
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS),
                &[&user_id],
            )
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_active_users_by_role(&self, tenant_id: &str, role: &str) -> Result<Vec<User>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM users WHERE tenant_id = $1 AND role = $2 AND active ORDER BY id",
                    USER_COLUMNS
                ),
                &[&tenant_id, &role],
            )
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = self
            .client
            .query_opt(
                "SELECT id, slug, domain, custom_domain FROM tenants WHERE id = $1",
                &[&tenant_id],
            )
            .await?;

        row.map(|row| -> Result<Tenant> {
            Ok(Tenant {
                id: row.try_get("id")?,
                slug: row.try_get("slug")?,
                domain: row.try_get("domain")?,
                custom_domain: row.try_get("custom_domain")?,
            })
        })
        .transpose()
    }

    async fn find_preference(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationPreference>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM notification_preferences \
                     WHERE tenant_id = $1 AND user_id = $2 AND event_type = $3",
                    PREFERENCE_COLUMNS
                ),
                &[&tenant_id, &user_id, &event_type],
            )
            .await?;

        row.as_ref().map(preference_from_row).transpose()
    }

    async fn find_preferences(
        &self,
        tenant_id: &str,
        user_id: &str,
        event_types: &[String],
    ) -> Result<Vec<NotificationPreference>> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {} FROM notification_preferences \
                     WHERE tenant_id = $1 AND user_id = $2 AND event_type = ANY($3)",
                    PREFERENCE_COLUMNS
                ),
                &[&tenant_id, &user_id, &event_types],
            )
            .await?;

        rows.iter().map(preference_from_row).collect()
    }

    async fn find_template(
        &self,
        tenant_id: &str,
        event_type: &str,
    ) -> Result<Option<NotificationTemplate>> {
        let row = self
            .client
            .query_opt(
                "SELECT tenant_id, event_type, title, message, variables \
                 FROM notification_templates WHERE tenant_id = $1 AND event_type = $2",
                &[&tenant_id, &event_type],
            )
            .await?;

        row.map(|row| -> Result<NotificationTemplate> {
            Ok(NotificationTemplate {
                tenant_id: row.try_get("tenant_id")?,
                event_type: row.try_get("event_type")?,
                title: row.try_get("title")?,
                message: row.try_get("message")?,
                variables: row.try_get("variables")?,
            })
        })
        .transpose()
    }

    async fn insert_notification(&self, notification: NewNotification) -> Result<Notification> {
        let id = Uuid::new_v4();
        let payload = JsonValue::Object(notification.payload.clone());
        let channels = channel_names(&notification.channels);

        self.client
            .execute(
                "INSERT INTO notifications \
                 (id, tenant_id, user_id, type, title, message, payload, urgency, channels, created_at, expires_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
                &[
                    &id,
                    &notification.tenant_id,
                    &notification.user_id,
                    &notification.event_type,
                    &notification.title,
                    &notification.message,
                    &payload,
                    &notification.urgency.as_str(),
                    &channels,
                    &notification.created_at,
                    &notification.expires_at,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    tenant_id = %notification.tenant_id,
                    user_id = %notification.user_id,
                    "Failed to insert notification"
                );
                anyhow!("Database write failed: {}", e)
            })?;

        debug!(notification_id = %id, "Notification persisted");
        Ok(notification.into_notification(id))
    }

    async fn insert_delivery(&self, delivery: NewDelivery) -> Result<NotificationDelivery> {
        let id = Uuid::new_v4();

        self.client
            .execute(
                "INSERT INTO notification_deliveries (id, notification_id, channel, provider, status) \
                 VALUES ($1, $2, $3, $4, 'PENDING')",
                &[
                    &id,
                    &delivery.notification_id,
                    &delivery.channel.as_str(),
                    &delivery.provider,
                ],
            )
            .await
            .context("Failed to insert delivery")?;

        Ok(delivery.into_pending(id))
    }

    async fn update_delivery(&self, delivery_id: Uuid, update: DeliveryUpdate) -> Result<()> {
        let status = update.status.to_string();

        let updated = self
            .client
            .execute(
                "UPDATE notification_deliveries \
                 SET status = $2, provider_message_id = $3, error_message = $4, metadata = $5, updated_at = NOW() \
                 WHERE id = $1",
                &[
                    &delivery_id,
                    &status,
                    &update.provider_message_id,
                    &update.error_message,
                    &update.metadata,
                ],
            )
            .await
            .context("Failed to update delivery")?;

        if updated == 0 {
            warn!(delivery_id = %delivery_id, "Delivery row not found for update");
        }

        Ok(())
    }

    async fn delivery_counts(&self, tenant_id: &str) -> Result<DeliveryCounts> {
        let notifications = self
            .client
            .query_one(
                "SELECT COUNT(*) AS total, \
                 COUNT(*) FILTER (WHERE n.created_at >= NOW() - INTERVAL '24 hours') AS recent, \
                 COUNT(*) FILTER (WHERE NOT EXISTS ( \
                     SELECT 1 FROM notification_deliveries d \
                     WHERE d.notification_id = n.id AND d.status = 'SENT')) AS pending \
                 FROM notifications n WHERE n.tenant_id = $1",
                &[&tenant_id],
            )
            .await
            .context("Failed to count notifications")?;

        let deliveries = self
            .client
            .query_one(
                "SELECT COUNT(*) FILTER (WHERE d.status = 'SENT') AS sent, \
                 COUNT(*) FILTER (WHERE d.status = 'FAILED') AS failed \
                 FROM notification_deliveries d \
                 JOIN notifications n ON n.id = d.notification_id \
                 WHERE n.tenant_id = $1",
                &[&tenant_id],
            )
            .await
            .context("Failed to count deliveries")?;

        let count = |row: &Row, column: &str| row.get::<_, i64>(column).max(0) as u64;

        Ok(DeliveryCounts {
            total: count(&notifications, "total"),
            recent_24h: count(&notifications, "recent"),
            pending: count(&notifications, "pending"),
            sent: count(&deliveries, "sent"),
            failed: count(&deliveries, "failed"),
        })
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .query_one("SELECT 1", &[])
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

#[async_trait]
impl HealthProbe for PgStore {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> DependencyHealth {
        let start = Instant::now();

        match self.ping().await {
            Ok(_) => {
                let elapsed = start.elapsed();
                debug!(latency = ?elapsed, "Database health check passed");
                DependencyHealth::up(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                DependencyHealth::down(format!("Health check query failed: {}", e))
            }
        }
    }
}
