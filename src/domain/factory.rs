use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    domain::policy::NotificationPolicy,
    error::ValidationError,
    models::event::{Channel, EventOptions, NotificationEvent, Payload, PublishRequest, Urgency},
};

pub const MAX_PAYLOAD_DEPTH: usize = 3;

pub const SENSITIVE_FIELDS: &[&str] = &[
    "cpf",
    "cnpj",
    "senha",
    "password",
    "token",
    "secret",
    "apiKey",
    "creditCard",
    "cvv",
    "cvc",
];

/// Builds validated, sanitized events from raw producer input.
pub struct NotificationFactory;

impl NotificationFactory {
    pub fn create_event(
        event_type: &str,
        tenant_id: &str,
        user_id: &str,
        payload: Value,
        options: &EventOptions,
    ) -> Result<NotificationEvent, ValidationError> {
        if !event_type.trim().is_empty() && !NotificationPolicy::is_known_event_type(event_type) {
            warn!(
                event_type,
                "Unknown event type, accepting it for forward compatibility"
            );
        }

        let payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(ValidationError::InvalidPayload(format!(
                    "expected an object, got {}",
                    json_kind(&other)
                )));
            }
        };

        Self::validate_required_fields(event_type, &payload)?;

        let payload = Self::sanitize_payload(payload);

        let urgency = match options.urgency.as_deref() {
            Some(raw) => raw.parse::<Urgency>()?,
            None => NotificationPolicy::default_urgency(event_type),
        };

        // Left unset when the producer does not choose: the service then
        // follows the user's preferences.
        let channels = options
            .channels
            .as_ref()
            .map(|raw| Self::parse_channels(raw))
            .transpose()?;

        let event = NotificationEvent {
            event_type: event_type.to_string(),
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            payload,
            urgency,
            channels,
        };

        Self::validate_event(&event)?;

        Ok(event)
    }

    pub fn from_request(request: PublishRequest) -> Result<NotificationEvent, ValidationError> {
        let options = request.options();
        Self::create_event(
            &request.event_type,
            &request.tenant_id,
            &request.user_id,
            request.payload,
            &options,
        )
    }

    /// One event per recipient of the same logical occurrence.
    pub fn create_batch_events(
        event_type: &str,
        tenant_id: &str,
        user_ids: &[String],
        payload: &Value,
        options: &EventOptions,
    ) -> Result<Vec<NotificationEvent>, ValidationError> {
        user_ids
            .iter()
            .map(|user_id| {
                Self::create_event(event_type, tenant_id, user_id, payload.clone(), options)
            })
            .collect()
    }

    fn validate_required_fields(event_type: &str, payload: &Payload) -> Result<(), ValidationError> {
        let missing: Vec<String> = NotificationPolicy::required_fields(event_type)
            .iter()
            .filter(|field| payload.get(**field).is_none_or(Value::is_null))
            .map(|field| field.to_string())
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        Err(ValidationError::MissingRequiredFields {
            event_type: event_type.to_string(),
            fields: missing,
        })
    }

    /// Drops sensitive keys at every level, then bounds nesting depth.
    pub fn sanitize_payload(payload: Payload) -> Payload {
        let stripped = strip_sensitive(payload);
        limit_depth(stripped, 0)
    }

    fn parse_channels(raw: &[String]) -> Result<Vec<Channel>, ValidationError> {
        let mut channels = Vec::with_capacity(raw.len());
        for value in raw {
            let channel = value.parse::<Channel>()?;
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }
        Ok(channels)
    }

    fn validate_event(event: &NotificationEvent) -> Result<(), ValidationError> {
        if event.event_type.trim().is_empty() {
            return Err(ValidationError::EmptyEventType);
        }

        if event.tenant_id.trim().is_empty() {
            return Err(ValidationError::EmptyTenantId);
        }

        if event.user_id.trim().is_empty() {
            return Err(ValidationError::EmptyUserId);
        }

        if event.payload.is_empty() {
            return Err(ValidationError::InvalidPayload(
                "payload must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn strip_sensitive(payload: Payload) -> Payload {
    payload
        .into_iter()
        .filter_map(|(key, value)| {
            if SENSITIVE_FIELDS.contains(&key.as_str()) {
                warn!(field = %key, "Sensitive field removed from payload");
                return None;
            }

            let value = match value {
                Value::Object(map) => Value::Object(strip_sensitive(map)),
                Value::Array(items) => Value::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Value::Object(map) => Value::Object(strip_sensitive(map)),
                            other => other,
                        })
                        .collect(),
                ),
                other => other,
            };

            Some((key, value))
        })
        .collect()
}

fn limit_depth(map: Map<String, Value>, depth: usize) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| (key, limit_value(value, depth + 1)))
        .collect()
}

fn limit_value(value: Value, depth: usize) -> Value {
    match value {
        Value::Object(map) if depth >= MAX_PAYLOAD_DEPTH => match map.get("id") {
            Some(id) => {
                let mut collapsed = Map::new();
                collapsed.insert("id".to_string(), id.clone());
                Value::Object(collapsed)
            }
            None => Value::Null,
        },
        Value::Array(_) if depth >= MAX_PAYLOAD_DEPTH => Value::Null,
        Value::Object(map) => Value::Object(limit_depth(map, depth)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| limit_item(item, depth + 1))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// Array elements past the limit become null, scalars included. Scalar object
/// fields are always kept.
fn limit_item(value: Value, depth: usize) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => limit_value(value, depth),
        _ if depth >= MAX_PAYLOAD_DEPTH => Value::Null,
        scalar => scalar,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
