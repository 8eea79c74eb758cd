use serde::{Deserialize, Serialize};

use crate::models::event::{Channel, Urgency};

/// Stored preference row, keyed by (tenant, user, event type or wildcard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub tenant_id: String,
    pub user_id: String,
    pub event_type: String,
    pub enabled: bool,
    pub channels: Vec<Channel>,
    pub urgency: Urgency,
}

/// The effective settings for one delivery decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceSettings {
    pub enabled: bool,
    pub channels: Vec<Channel>,
    pub urgency: Urgency,
}

impl PreferenceSettings {
    pub fn new(enabled: bool, channels: &[Channel], urgency: Urgency) -> Self {
        Self {
            enabled,
            channels: channels.to_vec(),
            urgency,
        }
    }
}

impl From<&NotificationPreference> for PreferenceSettings {
    fn from(pref: &NotificationPreference) -> Self {
        Self {
            enabled: pref.enabled,
            channels: pref.channels.clone(),
            urgency: pref.urgency,
        }
    }
}
