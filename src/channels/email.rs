use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use crate::{
    channels::ChannelAdapter,
    domain::strategy::StrategyRegistry,
    error::ChannelError,
    models::{
        event::Channel,
        notification::{DeliveryReceipt, Notification},
        user::Tenant,
        validation::validate_email,
    },
    ports::{EmailTransport, NotificationStore, TransactionalEmail},
    utils::trim_base_url,
};

pub struct EmailChannel {
    store: Arc<dyn NotificationStore>,
    transport: Arc<dyn EmailTransport>,
    strategies: Arc<StrategyRegistry>,
    app_base_url: String,
}

impl EmailChannel {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        transport: Arc<dyn EmailTransport>,
        strategies: Arc<StrategyRegistry>,
        app_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            strategies,
            app_base_url: app_base_url.into(),
        }
    }

    /// Custom domain or domain, then `<slug>.<app host>`, then the app URL itself.
    pub fn resolve_base_url(&self, tenant: Option<&Tenant>) -> String {
        let default_base = parse_base(&self.app_base_url);
        let protocol = default_base
            .as_ref()
            .map(|url| url.scheme().to_string())
            .unwrap_or_else(|| "https".to_string());

        if let Some(tenant) = tenant {
            let domain = [&tenant.custom_domain, &tenant.domain]
                .into_iter()
                .filter_map(|value| value.as_deref().map(str::trim))
                .find(|value| !value.is_empty());

            if let Some(domain) = domain {
                return trim_base_url(&ensure_protocol(domain, &protocol)).to_string();
            }

            let slug = tenant.slug.as_deref().map(str::trim).unwrap_or_default();
            if let (false, Some(base)) = (slug.is_empty(), default_base.as_ref()) {
                if let Some(host) = base.host_str() {
                    let host = match base.port() {
                        Some(port) => format!("{}:{}", host, port),
                        None => host.to_string(),
                    };
                    return format!("{}://{}.{}", protocol, slug, host);
                }
            }
        }

        trim_base_url(&self.app_base_url).to_string()
    }
}

fn parse_base(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw).ok()
    } else {
        Url::parse(&format!("https://{}", raw)).ok()
    }
}

fn ensure_protocol(value: &str, protocol: &str) -> String {
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        value.to_string()
    } else {
        format!("{}://{}", protocol, value)
    }
}

#[async_trait]
impl ChannelAdapter for EmailChannel {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn provider(&self) -> &str {
        self.transport.provider()
    }

    async fn deliver(&self, notification: &Notification) -> Result<DeliveryReceipt, ChannelError> {
        let user = self
            .store
            .find_user(&notification.user_id)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?
            .ok_or_else(|| ChannelError::UserNotFound(notification.user_id.clone()))?;

        let to = validate_email(&user.id, user.email.as_deref())?.to_string();

        let tenant = match self.store.find_tenant(&notification.tenant_id).await {
            Ok(tenant) => tenant,
            Err(e) => {
                warn!(tenant_id = %notification.tenant_id, error = %e, "Tenant lookup failed, using default app URL");
                None
            }
        };

        let base_url = self.resolve_base_url(tenant.as_ref());
        let strategy = self.strategies.get(&notification.event_type);
        let action_link = strategy.action_link(&base_url, &notification.payload);
        let action_text = action_link
            .as_ref()
            .map(|_| strategy.action_text().to_string());

        let name = match user.display_name() {
            name if name.is_empty() => to.clone(),
            name => name,
        };

        let email = TransactionalEmail {
            to: to.clone(),
            name,
            event_type: notification.event_type.clone(),
            title: notification.title.clone(),
            message: strategy.enrich_message(&notification.message, &notification.payload),
            action_link: action_link.clone(),
            action_text,
        };

        let result = self
            .transport
            .send_transactional_email(&notification.tenant_id, email)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        if !result.success {
            return Err(ChannelError::Rejected {
                error: result
                    .error
                    .unwrap_or_else(|| "Failed to send email".to_string()),
                message_id: result.message_id,
            });
        }

        info!(notification_id = %notification.id, to = %to, "Email sent");

        Ok(DeliveryReceipt {
            message_id: result.message_id,
            metadata: Some(json!({ "to": to, "actionLink": action_link })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{InMemoryStore, RecordingEmailTransport};

    fn channel(app_base_url: &str) -> EmailChannel {
        EmailChannel::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(RecordingEmailTransport::new()),
            Arc::new(StrategyRegistry::default()),
            app_base_url,
        )
    }

    fn tenant(slug: Option<&str>, domain: Option<&str>, custom: Option<&str>) -> Tenant {
        Tenant {
            id: "t1".to_string(),
            slug: slug.map(str::to_string),
            domain: domain.map(str::to_string),
            custom_domain: custom.map(str::to_string),
        }
    }

    #[test]
    fn custom_domain_wins_over_slug() {
        let channel = channel("https://app.example.com/");
        let t = tenant(Some("acme"), Some("acme.com.br"), Some("portal.acme.com"));
        assert_eq!(channel.resolve_base_url(Some(&t)), "https://portal.acme.com");
    }

    #[test]
    fn slug_becomes_subdomain_of_app_host() {
        let channel = channel("http://app.example.com:3000");
        let t = tenant(Some("acme"), None, Some("  "));
        assert_eq!(channel.resolve_base_url(Some(&t)), "http://acme.app.example.com:3000");
    }

    #[test]
    fn falls_back_to_app_url() {
        let channel = channel("https://app.example.com/");
        assert_eq!(channel.resolve_base_url(None), "https://app.example.com");
        assert_eq!(
            channel.resolve_base_url(Some(&tenant(None, None, None))),
            "https://app.example.com"
        );
    }
}
