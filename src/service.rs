use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    channels::ChannelRegistry,
    domain::{
        factory::NotificationFactory,
        policy::NotificationPolicy,
        preferences::{
            FALLBACK_ROLE, resolve_role_defaults, select_from_candidates, wildcard_candidates,
        },
        strategy::StrategyRegistry,
        templates::{fallback_template, render},
    },
    error::{ChannelError, PublishError},
    models::{
        event::{Channel, EventOptions, NotificationEvent, PublishRequest, Urgency},
        notification::{
            DeliveryCounts, DeliverySummary, DeliveryUpdate, NewDelivery, NewNotification,
            Notification,
        },
        preference::PreferenceSettings,
        status::DeliveryStatus,
        template::TemplateContent,
        user::User,
    },
    ports::{DedupStore, JobQueue, NotificationStore},
    utils::{MAX_ERROR_LENGTH, dedup_key, truncate_error},
};

pub const UNSUPPORTED_PROVIDER: &str = "UNSUPPORTED";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub dedup_ttl: Duration,
    /// Overrides the per-urgency retention from the policy when set.
    pub retention_days: Option<i64>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            dedup_ttl: Duration::from_secs(300),
            retention_days: None,
        }
    }
}

/// How a publish call was handled.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    Enqueued { job_id: String, priority: u8 },
    /// The queue was unreachable and the event was processed in the caller's task.
    ProcessedInline { result: ProcessOutcome },
    /// An identical event was published within the dedup window.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UserUnavailable,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Delivered {
        notification_id: Uuid,
        deliveries: Vec<DeliverySummary>,
    },
    Skipped {
        reason: SkipReason,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublishResult {
    pub user_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PublishOutcome>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserPublishResult {
    fn from_result(user_id: String, result: Result<PublishOutcome, PublishError>) -> Self {
        match result {
            Ok(outcome) => Self {
                user_id,
                outcome: Some(outcome),
                error: None,
            },
            Err(e) => Self {
                user_id,
                outcome: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    dedup: Arc<dyn DedupStore>,
    queue: Arc<dyn JobQueue>,
    channels: ChannelRegistry,
    strategies: Arc<StrategyRegistry>,
    settings: ServiceSettings,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        dedup: Arc<dyn DedupStore>,
        queue: Arc<dyn JobQueue>,
        channels: ChannelRegistry,
        strategies: Arc<StrategyRegistry>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            store,
            dedup,
            queue,
            channels,
            strategies,
            settings,
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub async fn delivery_counts(&self, tenant_id: &str) -> Result<DeliveryCounts> {
        self.store.delivery_counts(tenant_id).await
    }

    /// Validates, deduplicates and enqueues. Falls back to inline processing
    /// when the queue rejects the job.
    pub async fn publish_notification(
        &self,
        request: PublishRequest,
    ) -> Result<PublishOutcome, PublishError> {
        let event = NotificationFactory::from_request(request)?;
        self.publish_event(event).await
    }

    pub async fn publish_event(
        &self,
        event: NotificationEvent,
    ) -> Result<PublishOutcome, PublishError> {
        if self.is_duplicate(&event).await {
            info!(
                tenant_id = %event.tenant_id,
                user_id = %event.user_id,
                event_type = %event.event_type,
                "Duplicate notification suppressed"
            );
            return Ok(PublishOutcome::Duplicate);
        }

        let priority = NotificationPolicy::queue_priority(event.urgency);

        match self.queue.add_job(&event, Some(priority)).await {
            Ok(job_id) => {
                debug!(job_id = %job_id, priority, event_type = %event.event_type, "Notification enqueued");
                Ok(PublishOutcome::Enqueued { job_id, priority })
            }
            Err(e) => {
                error!(
                    error = %e,
                    tenant_id = %event.tenant_id,
                    user_id = %event.user_id,
                    event_type = %event.event_type,
                    "Enqueue failed, processing notification inline"
                );

                self.process_sync(&event)
                    .await
                    .map(|result| PublishOutcome::ProcessedInline { result })
                    .map_err(PublishError::Processing)
            }
        }
    }

    /// The dedup store failing open keeps publishing available when Redis is down.
    async fn is_duplicate(&self, event: &NotificationEvent) -> bool {
        let key = dedup_key(
            &event.tenant_id,
            &event.user_id,
            &event.event_type,
            &event.payload,
        );

        match self.dedup.set_if_absent(&key, self.settings.dedup_ttl).await {
            Ok(first) => !first,
            Err(e) => {
                warn!(error = %e, "Dedup check failed, publishing anyway");
                false
            }
        }
    }

    /// Publishes one event per user. A failure for one user does not affect the others.
    pub async fn publish_to_multiple_users(
        &self,
        event_type: &str,
        tenant_id: &str,
        user_ids: &[String],
        payload: &Value,
        options: &EventOptions,
    ) -> Vec<UserPublishResult> {
        let publishes = user_ids.iter().map(|user_id| async move {
            let result = match NotificationFactory::create_event(
                event_type,
                tenant_id,
                user_id,
                payload.clone(),
                options,
            ) {
                Ok(event) => self.publish_event(event).await,
                Err(e) => Err(PublishError::from(e)),
            };

            if let Err(e) = &result {
                warn!(user_id = %user_id, event_type, error = %e, "Publish to user failed");
            }

            UserPublishResult::from_result(user_id.clone(), result)
        });

        join_all(publishes).await
    }

    pub async fn publish_to_role(
        &self,
        event_type: &str,
        tenant_id: &str,
        role: &str,
        payload: &Value,
        options: &EventOptions,
    ) -> Result<Vec<UserPublishResult>, PublishError> {
        let users = self
            .store
            .find_active_users_by_role(tenant_id, role)
            .await
            .map_err(PublishError::Processing)?;

        let user_ids: Vec<String> = users.into_iter().map(|user| user.id).collect();
        info!(tenant_id, role, recipients = user_ids.len(), "Publishing to role");

        Ok(self
            .publish_to_multiple_users(event_type, tenant_id, &user_ids, payload, options)
            .await)
    }

    /// Runs the full delivery pipeline for one event. Errors here are
    /// infrastructure failures; business-level skips are `Ok(Skipped)`.
    pub async fn process_sync(&self, event: &NotificationEvent) -> Result<ProcessOutcome> {
        let Some(user) = self
            .store
            .find_active_user(&event.tenant_id, &event.user_id)
            .await?
        else {
            info!(
                tenant_id = %event.tenant_id,
                user_id = %event.user_id,
                event_type = %event.event_type,
                "User missing, inactive or outside tenant, skipping notification"
            );
            return Ok(ProcessOutcome::Skipped {
                reason: SkipReason::UserUnavailable,
            });
        };

        let mut preferences = self.resolve_preferences(event, &user).await?;

        if !preferences.enabled {
            if NotificationPolicy::can_disable_event(&event.event_type) {
                info!(
                    user_id = %event.user_id,
                    event_type = %event.event_type,
                    "Notification disabled by user preference"
                );
                return Ok(ProcessOutcome::Skipped {
                    reason: SkipReason::Disabled,
                });
            }

            warn!(
                user_id = %event.user_id,
                event_type = %event.event_type,
                "Mandatory event cannot be disabled, delivering anyway"
            );
            preferences.enabled = true;
        }

        let template = self.resolve_template(event).await?;
        let rendered = render(&template, &event.payload);
        let channels = resolve_channels(event, &preferences);

        let now = Utc::now();
        let retention_days = self
            .settings
            .retention_days
            .unwrap_or_else(|| NotificationPolicy::retention_days(event.urgency));

        let notification = self
            .store
            .insert_notification(NewNotification {
                tenant_id: event.tenant_id.clone(),
                user_id: event.user_id.clone(),
                event_type: event.event_type.clone(),
                title: rendered.title,
                message: rendered.message,
                payload: event.payload.clone(),
                urgency: event.urgency,
                channels: channels.clone(),
                created_at: now,
                expires_at: now + chrono::Duration::days(retention_days),
            })
            .await?;

        info!(
            notification_id = %notification.id,
            tenant_id = %notification.tenant_id,
            user_id = %notification.user_id,
            event_type = %notification.event_type,
            channels = ?channels,
            "Notification created"
        );

        let deliveries = join_all(
            channels
                .iter()
                .map(|channel| self.deliver_channel(&notification, *channel)),
        )
        .await;

        Ok(ProcessOutcome::Delivered {
            notification_id: notification.id,
            deliveries,
        })
    }

    /// Exact row, then wildcard rows, then role defaults.
    pub async fn resolve_preferences(
        &self,
        event: &NotificationEvent,
        user: &User,
    ) -> Result<PreferenceSettings> {
        if let Some(exact) = self
            .store
            .find_preference(&event.tenant_id, &event.user_id, &event.event_type)
            .await?
        {
            return Ok(PreferenceSettings::from(&exact));
        }

        let candidates = wildcard_candidates(&event.event_type);
        let rows = self
            .store
            .find_preferences(&event.tenant_id, &event.user_id, &candidates)
            .await?;

        if let Some(settings) = select_from_candidates(&candidates, &rows) {
            return Ok(settings);
        }

        let role = match user.role.trim() {
            "" => FALLBACK_ROLE,
            role => role,
        };

        Ok(resolve_role_defaults(role, &event.event_type, &candidates))
    }

    async fn resolve_template(&self, event: &NotificationEvent) -> Result<TemplateContent> {
        if let Some(template) = self
            .store
            .find_template(&event.tenant_id, &event.event_type)
            .await?
        {
            return Ok(template.into());
        }

        Ok(self
            .strategies
            .default_template(&event.event_type)
            .unwrap_or_else(|| fallback_template(event)))
    }

    /// Creates the PENDING row, attempts delivery and records the terminal state.
    /// Never fails: every problem ends up on the delivery row or in the log.
    async fn deliver_channel(&self, notification: &Notification, channel: Channel) -> DeliverySummary {
        let adapter = self.channels.get(channel);
        let provider = adapter
            .as_ref()
            .map(|adapter| adapter.provider().to_string())
            .unwrap_or_else(|| UNSUPPORTED_PROVIDER.to_string());

        let delivery = match self
            .store
            .insert_delivery(NewDelivery {
                notification_id: notification.id,
                channel,
                provider,
            })
            .await
        {
            Ok(delivery) => delivery,
            Err(e) => {
                error!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %e,
                    "Failed to create delivery record"
                );
                return DeliverySummary {
                    channel,
                    status: DeliveryStatus::Failed,
                    error: Some(truncate_error(&e.to_string(), MAX_ERROR_LENGTH)),
                };
            }
        };

        let result = match adapter {
            Some(adapter) => adapter.deliver(notification).await,
            None => Err(ChannelError::Unsupported(channel)),
        };

        let (update, summary) = match result {
            Ok(receipt) => {
                debug!(notification_id = %notification.id, channel = %channel, "Delivery sent");
                (
                    DeliveryUpdate::sent(receipt.message_id, receipt.metadata),
                    DeliverySummary {
                        channel,
                        status: DeliveryStatus::Sent,
                        error: None,
                    },
                )
            }
            Err(e) => {
                let message = truncate_error(&e.to_string(), MAX_ERROR_LENGTH);
                warn!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %message,
                    "Delivery failed"
                );
                (
                    DeliveryUpdate::failed(message.clone(), e.message_id().map(str::to_string)),
                    DeliverySummary {
                        channel,
                        status: DeliveryStatus::Failed,
                        error: Some(message),
                    },
                )
            }
        };

        if let Err(e) = self.store.update_delivery(delivery.id, update).await {
            error!(
                delivery_id = %delivery.id,
                channel = %channel,
                error = %e,
                "Failed to record delivery result"
            );
        }

        summary
    }
}

/// CRITICAL forces realtime and email. Explicit channels are narrowed to what
/// the user accepts, falling back to the user's set when nothing overlaps.
/// A preference that names no channels defers to the policy's urgency defaults.
pub fn resolve_channels(event: &NotificationEvent, preferences: &PreferenceSettings) -> Vec<Channel> {
    if event.urgency == Urgency::Critical {
        return vec![Channel::Realtime, Channel::Email];
    }

    let accepted = if preferences.channels.is_empty() {
        NotificationPolicy::default_channels(&event.event_type, Some(event.urgency))
    } else {
        preferences.channels.clone()
    };

    match &event.channels {
        Some(requested) => {
            let allowed: Vec<Channel> = requested
                .iter()
                .copied()
                .filter(|channel| accepted.contains(channel))
                .collect();

            if allowed.is_empty() { accepted } else { allowed }
        }
        None => accepted,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;

    fn event(urgency: Urgency, channels: Option<Vec<Channel>>) -> NotificationEvent {
        NotificationEvent {
            event_type: "processo.updated".to_string(),
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            payload: Map::new(),
            urgency,
            channels,
        }
    }

    #[test]
    fn explicit_channels_intersect_with_preferences() {
        let prefs = PreferenceSettings::new(true, &[Channel::Realtime, Channel::Email], Urgency::High);

        assert_eq!(
            resolve_channels(&event(Urgency::High, Some(vec![Channel::Email, Channel::Push])), &prefs),
            vec![Channel::Email]
        );
        assert_eq!(
            resolve_channels(&event(Urgency::High, Some(vec![Channel::Push])), &prefs),
            vec![Channel::Realtime, Channel::Email]
        );
    }

    #[test]
    fn empty_preference_channels_use_urgency_defaults() {
        let prefs = PreferenceSettings::new(true, &[], Urgency::Medium);

        assert_eq!(
            resolve_channels(&event(Urgency::High, None), &prefs),
            vec![Channel::Realtime, Channel::Email]
        );
        assert_eq!(
            resolve_channels(&event(Urgency::Info, Some(vec![Channel::Push])), &prefs),
            vec![Channel::Realtime]
        );
    }

    #[test]
    fn critical_ignores_preferences() {
        let prefs = PreferenceSettings::new(true, &[], Urgency::Info);
        assert_eq!(
            resolve_channels(&event(Urgency::Critical, Some(vec![Channel::Push])), &prefs),
            vec![Channel::Realtime, Channel::Email]
        );
    }
}
