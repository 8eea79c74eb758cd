//! Preference resolution: exact row, then wildcard rows from most to least
//! specific, then the static defaults for the user's role.

use crate::models::{
    event::{Channel, Urgency},
    preference::{NotificationPreference, PreferenceSettings},
};

pub const DEFAULT_KEY: &str = "default";
pub const FALLBACK_ROLE: &str = "SECRETARIA";

/// Candidate keys for `event_type`, most specific first, ending in `"default"`.
///
/// `processo.status.changed` yields `processo.status.*`, `processo.*`, `default`.
pub fn wildcard_candidates(event_type: &str) -> Vec<String> {
    let segments: Vec<&str> = event_type.split('.').filter(|s| !s.is_empty()).collect();
    let mut candidates: Vec<String> = Vec::new();

    let longest = segments.len().saturating_sub(1).max(1);
    for len in (1..=longest).rev() {
        if len > segments.len() {
            continue;
        }
        let candidate = format!("{}.*", segments[..len].join("."));
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }

    candidates.push(DEFAULT_KEY.to_string());
    candidates
}

/// First stored row matching the candidates in order.
pub fn select_from_candidates(
    candidates: &[String],
    rows: &[NotificationPreference],
) -> Option<PreferenceSettings> {
    candidates.iter().find_map(|candidate| {
        rows.iter()
            .find(|row| &row.event_type == candidate)
            .map(PreferenceSettings::from)
    })
}

pub fn resolve_role_defaults(role: &str, event_type: &str, candidates: &[String]) -> PreferenceSettings {
    let table = role_defaults(role);

    let lookup = |key: &str| {
        table
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, settings)| settings.clone())
    };

    lookup(event_type)
        .or_else(|| candidates.iter().find_map(|candidate| lookup(candidate.as_str())))
        .unwrap_or_else(|| PreferenceSettings::new(true, &[Channel::Realtime], Urgency::Medium))
}

/// Static defaults per role. Unknown roles get the SECRETARIA table.
pub fn role_defaults(role: &str) -> Vec<(&'static str, PreferenceSettings)> {
    use Channel::{Email, Realtime};
    use Urgency::{Critical, High, Medium};

    let on = |channels: &[Channel], urgency: Urgency| PreferenceSettings::new(true, channels, urgency);

    match role {
        "SUPER_ADMIN" | "ADMIN" => vec![
            (DEFAULT_KEY, on(&[Realtime, Email], High)),
            ("processo.*", on(&[Realtime, Email], High)),
            ("cliente.*", on(&[Realtime], Medium)),
            ("financeiro.*", on(&[Realtime, Email], High)),
            ("equipe.*", on(&[Realtime, Email], High)),
        ],
        "ADVOGADO" => vec![
            (DEFAULT_KEY, on(&[Realtime], Medium)),
            ("processo.*", on(&[Realtime, Email], High)),
            ("cliente.*", on(&[Realtime], Medium)),
            ("agenda.*", on(&[Realtime, Email], High)),
            ("prazo.*", on(&[Realtime, Email], Critical)),
        ],
        "FINANCEIRO" => vec![
            (DEFAULT_KEY, on(&[Realtime], Medium)),
            ("financeiro.*", on(&[Realtime, Email], High)),
            ("contrato.*", on(&[Realtime, Email], High)),
            ("pagamento.*", on(&[Realtime, Email], Critical)),
        ],
        "CLIENTE" => vec![
            (DEFAULT_KEY, on(&[Realtime], Medium)),
            ("processo.*", on(&[Realtime], Medium)),
            ("contrato.*", on(&[Realtime], Medium)),
            ("pagamento.*", on(&[Realtime], High)),
        ],
        _ => vec![
            (DEFAULT_KEY, on(&[Realtime], Medium)),
            ("processo.*", on(&[Realtime], Medium)),
            ("cliente.*", on(&[Realtime], Medium)),
            ("agenda.*", on(&[Realtime], High)),
            ("equipe.*", on(&[Realtime], Medium)),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_run_from_specific_to_default() {
        assert_eq!(wildcard_candidates("processo.created"), vec!["processo.*", "default"]);
        assert_eq!(
            wildcard_candidates("processo.status.changed"),
            vec!["processo.status.*", "processo.*", "default"]
        );
        assert_eq!(wildcard_candidates("sistema"), vec!["sistema.*", "default"]);
    }

    #[test]
    fn unknown_role_uses_secretaria_table() {
        let candidates = wildcard_candidates("agenda.changed");
        let settings = resolve_role_defaults("ESTAGIARIO", "agenda.changed", &candidates);
        assert_eq!(settings.channels, vec![Channel::Realtime]);
        assert_eq!(settings.urgency, Urgency::High);
    }
}
