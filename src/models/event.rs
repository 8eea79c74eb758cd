use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

pub type Payload = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Info,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Critical => "CRITICAL",
            Urgency::High => "HIGH",
            Urgency::Medium => "MEDIUM",
            Urgency::Info => "INFO",
        }
    }
}

impl Display for Urgency {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Urgency::Critical),
            "HIGH" => Ok(Urgency::High),
            "MEDIUM" => Ok(Urgency::Medium),
            "INFO" => Ok(Urgency::Info),
            other => Err(ValidationError::InvalidUrgency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Realtime,
    Email,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Realtime => "REALTIME",
            Channel::Email => "EMAIL",
            Channel::Push => "PUSH",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REALTIME" => Ok(Channel::Realtime),
            "EMAIL" => Ok(Channel::Email),
            "PUSH" => Ok(Channel::Push),
            other => Err(ValidationError::InvalidChannel(other.to_string())),
        }
    }
}

/// A validated event, produced by the factory and consumed once by the service.
///
/// This is also the job body carried through the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    pub user_id: String,
    pub payload: Payload,
    pub urgency: Urgency,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<Channel>>,
}

/// Raw producer input, before validation. Urgency and channels stay as strings
/// so that out-of-range values surface as validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    pub user_id: String,
    pub payload: Value,

    #[serde(default)]
    pub urgency: Option<String>,

    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

impl PublishRequest {
    pub fn new(
        event_type: impl Into<String>,
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            payload,
            urgency: None,
            channels: None,
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency.as_str().to_string());
        self
    }

    pub fn with_channels(mut self, channels: &[Channel]) -> Self {
        self.channels = Some(channels.iter().map(|c| c.as_str().to_string()).collect());
        self
    }

    pub fn options(&self) -> EventOptions {
        EventOptions {
            urgency: self.urgency.clone(),
            channels: self.channels.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    pub urgency: Option<String>,
    pub channels: Option<Vec<String>>,
}

impl EventOptions {
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency.as_str().to_string());
        self
    }

    pub fn with_channels(mut self, channels: &[Channel]) -> Self {
        self.channels = Some(channels.iter().map(|c| c.as_str().to_string()).collect());
        self
    }
}
