//! Per-event-type presentation: default template, email deep link and
//! call-to-action label, and extra email details. Unknown event types fall
//! through to a generic strategy.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::{
    domain::templates::stringify,
    models::{event::Payload, template::TemplateContent},
};

pub trait EventStrategy: Send + Sync {
    fn default_template(&self) -> Option<TemplateContent> {
        None
    }

    /// `base_url` has no trailing slash.
    fn action_link(&self, base_url: &str, _payload: &Payload) -> Option<String> {
        Some(format!("{}/dashboard", base_url))
    }

    fn action_text(&self) -> &'static str {
        "Acessar Plataforma"
    }

    fn enrich_message(&self, message: &str, _payload: &Payload) -> String {
        message.to_string()
    }
}

/// Where an event's email button points.
#[derive(Debug, Clone, Copy)]
pub enum LinkTarget {
    Dashboard,
    /// `/processos/{processoId}` or nothing when the id is absent.
    Process,
    /// `/processos/{processoId}`, else `/andamentos`.
    ProcessOrMovements,
    Finance,
    /// `/agenda/{eventoId}`, else `/agenda`.
    Calendar,
}

pub struct StandardStrategy {
    template: Option<(&'static str, &'static str)>,
    link: LinkTarget,
    action_text: &'static str,
}

impl StandardStrategy {
    pub const fn new(
        template: Option<(&'static str, &'static str)>,
        link: LinkTarget,
        action_text: &'static str,
    ) -> Self {
        Self {
            template,
            link,
            action_text,
        }
    }
}

impl EventStrategy for StandardStrategy {
    fn default_template(&self) -> Option<TemplateContent> {
        self.template
            .map(|(title, message)| TemplateContent::new(title, message))
    }

    fn action_link(&self, base_url: &str, payload: &Payload) -> Option<String> {
        let id = |key: &str| payload.get(key).filter(|v| !v.is_null()).map(stringify);

        match self.link {
            LinkTarget::Dashboard => Some(format!("{}/dashboard", base_url)),
            LinkTarget::Process => {
                id("processoId").map(|pid| format!("{}/processos/{}", base_url, pid))
            }
            LinkTarget::ProcessOrMovements => Some(match id("processoId") {
                Some(pid) => format!("{}/processos/{}", base_url, pid),
                None => format!("{}/andamentos", base_url),
            }),
            LinkTarget::Finance => Some(format!("{}/financeiro", base_url)),
            LinkTarget::Calendar => Some(match id("eventoId") {
                Some(eid) => format!("{}/agenda/{}", base_url, eid),
                None => format!("{}/agenda", base_url),
            }),
        }
    }

    fn action_text(&self) -> &'static str {
        self.action_text
    }
}

/// Andamento events append a readable block of process details to the email body.
pub struct MovementStrategy {
    inner: StandardStrategy,
}

impl MovementStrategy {
    pub const fn new(template: (&'static str, &'static str)) -> Self {
        Self {
            inner: StandardStrategy::new(
                Some(template),
                LinkTarget::ProcessOrMovements,
                "Ver andamento",
            ),
        }
    }
}

impl EventStrategy for MovementStrategy {
    fn default_template(&self) -> Option<TemplateContent> {
        self.inner.default_template()
    }

    fn action_link(&self, base_url: &str, payload: &Payload) -> Option<String> {
        self.inner.action_link(base_url, payload)
    }

    fn action_text(&self) -> &'static str {
        self.inner.action_text()
    }

    fn enrich_message(&self, message: &str, payload: &Payload) -> String {
        let text = |key: &str| {
            payload
                .get(key)
                .filter(|v| !v.is_null())
                .map(stringify)
                .filter(|s| !s.is_empty())
        };

        let mut details = Vec::new();

        if let Some(numero) = text("processoNumero") {
            details.push(format!("Processo: {}", numero));
        }
        if let Some(titulo) = text("titulo") {
            details.push(format!("Andamento: {}", titulo));
        }
        if let Some(tipo) = text("tipo") {
            details.push(format!("Tipo: {}", tipo));
        }
        if let Some(date) = payload.get("dataMovimentacao").and_then(format_date) {
            details.push(format!("Data/Hora: {}", date));
        }
        if let Some(descricao) = text("descricao") {
            details.push(format!("Descrição: {}", descricao));
        }

        if details.is_empty() {
            return message.to_string();
        }

        format!("{}\n\n{}", message, details.join("\n"))
    }
}

/// `dd/mm/yyyy HH:MM` in UTC, from an RFC 3339 string or epoch milliseconds.
pub fn format_date(value: &Value) -> Option<String> {
    let parsed: DateTime<Utc> = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))?,
        Value::Number(n) => Utc.timestamp_millis_opt(n.as_i64()?).single()?,
        _ => return None,
    };

    Some(parsed.format("%d/%m/%Y %H:%M").to_string())
}

pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn EventStrategy>>,
    fallback: Arc<dyn EventStrategy>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            fallback: Arc::new(StandardStrategy::new(
                None,
                LinkTarget::Dashboard,
                "Acessar Plataforma",
            )),
        }
    }

    pub fn register(&mut self, event_type: &str, strategy: Arc<dyn EventStrategy>) {
        self.strategies.insert(event_type.to_string(), strategy);
    }

    pub fn get(&self, event_type: &str) -> Arc<dyn EventStrategy> {
        self.strategies
            .get(event_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    pub fn default_template(&self, event_type: &str) -> Option<TemplateContent> {
        self.strategies
            .get(event_type)
            .and_then(|strategy| strategy.default_template())
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        use LinkTarget::{Calendar, Dashboard, Finance, Process, ProcessOrMovements};

        let mut registry = Self::empty();

        let standard: &[(&str, Option<(&str, &str)>, LinkTarget, &str)] = &[
            (
                "processo.created",
                Some(("Novo processo criado", "Processo {numero} foi criado para {cliente}")),
                Process,
                "Ver Processo",
            ),
            (
                "processo.updated",
                Some(("Processo atualizado", "Processo {numero} foi atualizado: {changesSummary}")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "processo.status_changed",
                Some((
                    "Status do processo alterado",
                    "Processo {numero} mudou de {oldStatusLabel} para {newStatusLabel}",
                )),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "prazo.expiring",
                Some(("Prazo próximo do vencimento", "Prazo do processo {numero} está próximo do vencimento")),
                ProcessOrMovements,
                "Ver Prazos",
            ),
            (
                "prazo.expiring_7d",
                Some(("Prazo próximo do vencimento", "Prazo do processo {numero} vence em 7 dias")),
                ProcessOrMovements,
                "Ver Prazos",
            ),
            (
                "prazo.expiring_3d",
                Some(("Prazo próximo do vencimento", "Prazo do processo {numero} vence em 3 dias")),
                ProcessOrMovements,
                "Ver Prazos",
            ),
            (
                "prazo.expiring_1d",
                Some(("Prazo próximo do vencimento", "Prazo do processo {numero} vence em 1 dia")),
                ProcessOrMovements,
                "Ver Prazos",
            ),
            (
                "prazo.expired",
                Some(("Prazo vencido", "Prazo do processo {numero} venceu")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "cliente.created",
                Some(("Novo cliente cadastrado", "Cliente {nome} foi cadastrado")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "contrato.created",
                Some(("Novo contrato criado", "Contrato {numero} foi criado para {cliente}")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "contrato.signed",
                Some(("Contrato assinado", "Contrato {numero} foi assinado")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "pagamento.paid",
                Some(("Pagamento confirmado", "Pagamento de R$ {valor} foi confirmado")),
                Finance,
                "Ver Financeiro",
            ),
            ("pagamento.pending", None, Finance, "Ver Financeiro"),
            (
                "pagamento.overdue",
                Some(("Pagamento em atraso", "Pagamento de R$ {valor} está em atraso")),
                Finance,
                "Ver Financeiro",
            ),
            (
                "evento.created",
                Some(("Novo evento agendado", "Evento {titulo} foi agendado para {data}")),
                Calendar,
                "Ver Evento",
            ),
            ("evento.updated", None, Calendar, "Ver Evento"),
            ("evento.confirmation_updated", None, Calendar, "Ver Evento"),
            (
                "evento.reminder_1h",
                Some(("Lembrete de evento", "Evento {titulo} em 1 hora")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "equipe.user_invited",
                Some(("Novo convite de equipe", "Convite enviado para {email}")),
                Dashboard,
                "Acessar Plataforma",
            ),
            (
                "equipe.user_joined",
                Some(("Novo membro da equipe", "{nome} aceitou o convite e entrou na equipe")),
                Dashboard,
                "Acessar Plataforma",
            ),
            ("documento.uploaded", None, Process, "Ver Documento"),
        ];

        for (event_type, template, link, action_text) in standard {
            registry.register(
                event_type,
                Arc::new(StandardStrategy::new(*template, *link, action_text)),
            );
        }

        registry.register(
            "andamento.created",
            Arc::new(MovementStrategy::new((
                "Novo andamento registrado",
                "Um novo andamento \"{titulo}\" foi adicionado ao processo {processoNumero}.",
            ))),
        );
        registry.register(
            "andamento.updated",
            Arc::new(MovementStrategy::new((
                "Andamento atualizado",
                "O andamento \"{titulo}\" do processo {processoNumero} foi atualizado: {changesSummary}",
            ))),
        );

        registry
    }
}
