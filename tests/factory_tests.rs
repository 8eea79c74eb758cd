use anyhow::Result;
use notification_dispatch::{
    domain::{factory::NotificationFactory, policy::NotificationPolicy},
    error::ValidationError,
    models::event::{Channel, EventOptions, Urgency},
};
use serde_json::json;

/// Test: Missing required fields are listed in the error
#[test]
fn test_required_fields_are_enforced() {
    let result = NotificationFactory::create_event(
        "processo.created",
        "t1",
        "u1",
        json!({"cliente": "Acme", "numero": null}),
        &EventOptions::default(),
    );

    assert_eq!(
        result,
        Err(ValidationError::MissingRequiredFields {
            event_type: "processo.created".to_string(),
            fields: vec!["numero".to_string()],
        })
    );
}

/// Test: Nested objects past depth 3 collapse to their id
#[test]
fn test_payload_depth_is_bounded() -> Result<()> {
    let event = NotificationFactory::create_event(
        "sistema.audit",
        "t1",
        "u1",
        json!({
            "l1": {
                "l2": {
                    "l3": {
                        "id": "deep-1",
                        "name": "dropped",
                        "l4": { "l5": { "value": 1 } }
                    },
                    "sem_id": { "x": { "y": 1 } }
                }
            }
        }),
        &EventOptions::default(),
    )?;

    let l2 = &event.payload["l1"]["l2"];
    assert_eq!(l2["l3"], json!({"id": "deep-1"}));
    assert!(l2["sem_id"].is_null());

    Ok(())
}

/// Test: Array elements past depth 3 are nulled, shallower ones are kept
#[test]
fn test_array_elements_past_depth_limit() -> Result<()> {
    let event = NotificationFactory::create_event(
        "sistema.audit",
        "t1",
        "u1",
        json!({
            "tags": ["urgente", 2],
            "processo": {
                "partes": ["Acme", {"id": "p-7", "nome": "Beta"}, ["nested"]],
                "numero": "0001"
            }
        }),
        &EventOptions::default(),
    )?;

    assert_eq!(event.payload["tags"], json!(["urgente", 2]));
    assert_eq!(
        event.payload["processo"]["partes"],
        json!([null, {"id": "p-7"}, null])
    );
    assert_eq!(event.payload["processo"]["numero"], json!("0001"));

    Ok(())
}

/// Test: Sensitive keys are removed at any level
#[test]
fn test_sensitive_fields_are_stripped_recursively() -> Result<()> {
    let event = NotificationFactory::create_event(
        "cliente.created",
        "t1",
        "u1",
        json!({
            "clienteId": "c-1",
            "nome": "Acme",
            "cnpj": "00.000.000/0001-00",
            "contato": { "email": "a@b.com", "password": "x", "token": "y" }
        }),
        &EventOptions::default(),
    )?;

    assert!(event.payload.get("cnpj").is_none());
    assert_eq!(event.payload["contato"], json!({"email": "a@b.com"}));

    Ok(())
}

/// Test: Urgency defaults from the catalogue and channels stay unset
#[test]
fn test_defaults_come_from_policy() -> Result<()> {
    let event = NotificationFactory::create_event(
        "pagamento.overdue",
        "t1",
        "u1",
        json!({"pagamentoId": "pg-1", "valor": 10, "diasAtraso": 3}),
        &EventOptions::default(),
    )?;

    assert_eq!(event.urgency, Urgency::Critical);
    assert_eq!(event.channels, None);
    assert!(!NotificationPolicy::can_disable_event("pagamento.overdue"));
    assert_eq!(NotificationPolicy::queue_priority(event.urgency), 1);

    Ok(())
}

/// Test: Out-of-range urgency and channel values are rejected
#[test]
fn test_enum_values_are_validated() {
    let payload = json!({"numero": "1"});

    let bad_urgency = NotificationFactory::create_event(
        "processo.created",
        "t1",
        "u1",
        payload.clone(),
        &EventOptions {
            urgency: Some("URGENT".to_string()),
            channels: None,
        },
    );
    assert_eq!(bad_urgency, Err(ValidationError::InvalidUrgency("URGENT".to_string())));

    let bad_channel = NotificationFactory::create_event(
        "processo.created",
        "t1",
        "u1",
        payload,
        &EventOptions {
            urgency: None,
            channels: Some(vec!["EMAIL".to_string(), "SMS".to_string()]),
        },
    );
    assert_eq!(bad_channel, Err(ValidationError::InvalidChannel("SMS".to_string())));
}

/// Test: Empty identifiers and non-object payloads fail validation
#[test]
fn test_structural_validation() {
    let options = EventOptions::default();

    assert_eq!(
        NotificationFactory::create_event("sistema.x", " ", "u1", json!({"a": 1}), &options),
        Err(ValidationError::EmptyTenantId)
    );
    assert_eq!(
        NotificationFactory::create_event("", "t1", "u1", json!({"a": 1}), &options),
        Err(ValidationError::EmptyEventType)
    );
    assert!(matches!(
        NotificationFactory::create_event("sistema.x", "t1", "u1", json!([1, 2]), &options),
        Err(ValidationError::InvalidPayload(_))
    ));
    assert!(matches!(
        NotificationFactory::create_event("sistema.x", "t1", "u1", json!({}), &options),
        Err(ValidationError::InvalidPayload(_))
    ));
}

/// Test: Batch creation yields one event per recipient and dedups channels
#[test]
fn test_batch_events() -> Result<()> {
    let users = vec!["u1".to_string(), "u2".to_string()];
    let options = EventOptions::default()
        .with_urgency(Urgency::Info)
        .with_channels(&[Channel::Realtime, Channel::Realtime, Channel::Push]);

    let events = NotificationFactory::create_batch_events(
        "tarefa.created",
        "t1",
        &users,
        &json!({"tarefaId": "tf-1", "titulo": "Revisar"}),
        &options,
    )?;

    assert_eq!(events.len(), 2);
    assert_eq!(events[1].user_id, "u2");
    assert!(events.iter().all(|e| e.urgency == Urgency::Info));
    assert_eq!(
        events[0].channels,
        Some(vec![Channel::Realtime, Channel::Push])
    );

    Ok(())
}
