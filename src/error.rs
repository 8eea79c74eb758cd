use thiserror::Error;

use crate::models::event::Channel;

/// Structural problems with an event. Raised before anything reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid event type")]
    EmptyEventType,

    #[error("Invalid tenantId")]
    EmptyTenantId,

    #[error("Invalid userId")]
    EmptyUserId,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid payload for event {event_type}. Missing required fields: {}", fields.join(", "))]
    MissingRequiredFields {
        event_type: String,
        fields: Vec<String>,
    },

    #[error("Invalid urgency: {0}")]
    InvalidUrgency(String),

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),
}

/// Why a single channel delivery failed. Always recorded on the delivery row,
/// never propagated past the fan-out.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("User {0} has no email configured")]
    MissingEmail(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("{error}")]
    Rejected {
        error: String,
        message_id: Option<String>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Channel {0} is not supported")]
    Unsupported(Channel),
}

impl ChannelError {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            ChannelError::Rejected { message_id, .. } => message_id.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Inline processing failed: {0}")]
    Processing(#[source] anyhow::Error),
}
