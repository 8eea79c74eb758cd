use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Tenant override for an event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTemplate {
    pub tenant_id: String,
    pub event_type: String,
    pub title: String,
    pub message: String,

    #[serde(default)]
    pub variables: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContent {
    pub title: String,
    pub message: String,
}

impl TemplateContent {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

impl From<NotificationTemplate> for TemplateContent {
    fn from(template: NotificationTemplate) -> Self {
        Self {
            title: template.title,
            message: template.message,
        }
    }
}
