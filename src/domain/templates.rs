use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::models::{
    event::{NotificationEvent, Payload},
    template::TemplateContent,
};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}\s]+)\}").expect("placeholder pattern is valid"));

/// Replaces each `{key}` with the payload value. Tokens with no matching key are kept.
pub fn render(template: &TemplateContent, payload: &Payload) -> TemplateContent {
    TemplateContent {
        title: substitute(&template.title, payload),
        message: substitute(&template.message, payload),
    }
}

pub fn substitute(text: &str, payload: &Payload) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match payload.get(&caps[1]) {
            Some(value) => stringify(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// `processo.document_uploaded` -> `Processo Document Uploaded`.
pub fn pretty_event_type(event_type: &str) -> String {
    event_type
        .split(['.', '_'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Generic template for event types that have neither a tenant override nor a
/// built-in entry. Payload `title`/`titulo` and `message`/`mensagem` win when present.
pub fn fallback_template(event: &NotificationEvent) -> TemplateContent {
    let pretty = pretty_event_type(&event.event_type);

    let title = first_text(&event.payload, &["title", "titulo"])
        .unwrap_or_else(|| format!("Atualização: {}", pretty));
    let message = first_text(&event.payload, &["message", "mensagem"])
        .unwrap_or_else(|| format!("Você recebeu uma nova atualização ({}).", pretty));

    TemplateContent::new(title, message)
}

fn first_text(payload: &Payload, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => Payload::new(),
        }
    }

    #[test]
    fn substitutes_known_keys_and_keeps_unknown_tokens() {
        let p = payload(json!({"numero": "123", "valor": 10.5, "pago": true}));
        assert_eq!(
            substitute("Processo {numero}: R$ {valor} {pago} {faltando}", &p),
            "Processo 123: R$ 10.5 true {faltando}"
        );
    }

    #[test]
    fn pretty_type_is_title_cased_with_spaces() {
        assert_eq!(pretty_event_type("processo.document_uploaded"), "Processo Document Uploaded");
    }
}
