//! Static business rules per event type: urgency, required payload fields,
//! queue priority, and whether a user may switch an event off.

use std::{
    collections::{BTreeSet, HashMap},
    sync::LazyLock,
};

use crate::models::event::{Channel, Urgency};

const RETENTION_DAYS: &[(Urgency, i64)] = &[
    (Urgency::Critical, 30),
    (Urgency::High, 30),
    (Urgency::Medium, 30),
    (Urgency::Info, 30),
];

const REQUIRED_FIELDS: &[(&str, &[&str])] = &[
    // processos
    ("processo.created", &["numero"]),
    ("processo.updated", &["processoId", "numero"]),
    ("processo.status_changed", &["processoId", "numero", "oldStatus", "newStatus"]),
    ("processo.document_uploaded", &["processoId", "numero", "documentoId", "documentoNome"]),
    // prazos
    ("prazo.created", &["prazoId", "processoId", "processoNumero", "titulo", "dataVencimento"]),
    ("prazo.updated", &["prazoId", "processoId", "processoNumero"]),
    ("prazo.expiring_7d", &["prazoId", "processoId", "processoNumero", "dataVencimento"]),
    ("prazo.expiring_3d", &["prazoId", "processoId", "processoNumero", "dataVencimento"]),
    ("prazo.expiring_1d", &["prazoId", "processoId", "processoNumero", "dataVencimento"]),
    ("prazo.expiring_2h", &["prazoId", "processoId", "processoNumero", "dataVencimento"]),
    ("prazo.expired", &["prazoId", "processoId", "processoNumero", "dataVencimento"]),
    // andamentos and their movimentacao alias
    ("andamento.created", &["andamentoId", "processoId", "processoNumero", "titulo"]),
    ("andamento.updated", &["andamentoId", "processoId", "processoNumero", "titulo"]),
    ("movimentacao.created", &["movimentacaoId", "processoId", "processoNumero", "titulo"]),
    ("movimentacao.updated", &["movimentacaoId", "processoId", "processoNumero", "titulo"]),
    // clientes
    ("cliente.created", &["clienteId", "nome"]),
    ("cliente.updated", &["clienteId", "nome"]),
    ("cliente.document_uploaded", &["clienteId", "nome", "documentoId", "documentoNome"]),
    ("cliente.contact_added", &["clienteId", "nome", "contatoTipo"]),
    // advogados
    ("advogado.created", &["advogadoId", "nome"]),
    ("advogado.updated", &["advogadoId", "nome"]),
    ("advogado.avatar_updated", &["advogadoId", "nome"]),
    ("advogado.permissions_changed", &["advogadoId", "nome", "oldPermissions", "newPermissions"]),
    // equipe
    ("equipe.cargo_created", &["cargoId", "cargoNome"]),
    ("equipe.cargo_updated", &["cargoId", "cargoNome"]),
    ("equipe.user_invited", &["userId", "email", "role"]),
    ("equipe.user_joined", &["userId", "nome", "role"]),
    ("equipe.permissions_changed", &["userId", "nome", "oldPermissions", "newPermissions"]),
    ("equipe.user_removed", &["userId", "nome", "role"]),
    // contratos
    ("contrato.created", &["contratoId", "clienteId", "clienteNome"]),
    ("contrato.updated", &["contratoId", "clienteId"]),
    ("contrato.status_changed", &["contratoId", "oldStatus", "newStatus"]),
    ("contrato.signature_pending", &["contratoId", "clienteId", "clienteNome", "dataVencimento"]),
    ("contrato.signed", &["contratoId", "clienteId", "clienteNome", "dataAssinatura"]),
    ("contrato.expired", &["contratoId", "clienteId", "clienteNome"]),
    ("contrato.expiring", &["contratoId", "clienteId", "clienteNome", "dataFim", "diasRestantes"]),
    ("contrato.cancelled", &["contratoId", "clienteId", "clienteNome"]),
    // pagamentos
    ("pagamento.created", &["pagamentoId", "valor", "metodo"]),
    ("pagamento.paid", &["pagamentoId", "valor", "metodo", "dataPagamento"]),
    ("pagamento.failed", &["pagamentoId", "valor", "motivo"]),
    ("pagamento.overdue", &["pagamentoId", "valor", "diasAtraso"]),
    ("pagamento.estornado", &["pagamentoId", "valor", "dataEstorno"]),
    ("boleto.generated", &["pagamentoId", "boletoId", "valor", "vencimento"]),
    ("pix.generated", &["pagamentoId", "valor", "qrCode"]),
    // honorarios
    ("honorario.created", &["honorarioId", "contratoId", "valor"]),
    ("honorario.updated", &["honorarioId", "contratoId"]),
    ("honorario.paid", &["honorarioId", "contratoId", "valor", "dataPagamento"]),
    // agenda
    ("evento.created", &["eventoId", "titulo", "dataInicio"]),
    ("evento.updated", &["eventoId", "titulo"]),
    ("evento.cancelled", &["eventoId", "titulo"]),
    ("evento.confirmation_updated", &["eventoId", "titulo", "confirmacaoStatus"]),
    ("evento.reminder_1h", &["eventoId", "titulo", "dataInicio"]),
    ("evento.reminder_1d", &["eventoId", "titulo", "dataInicio"]),
    ("evento.google_synced", &["eventoId", "titulo", "googleEventId"]),
    // documentos
    ("documento.uploaded", &["documentoId", "nome"]),
    ("documento.approved", &["documentoId", "nome", "aprovadoPor"]),
    ("documento.rejected", &["documentoId", "nome", "motivo"]),
    ("documento.expired", &["documentoId", "nome", "dataExpiracao"]),
    // modelos
    ("modelo.created", &["modeloId", "nome", "tipo"]),
    ("modelo.updated", &["modeloId", "nome"]),
    ("modelo.used", &["modeloId", "nome", "processoId"]),
    // procuracoes
    ("procuracao.created", &["procuracaoId", "numero"]),
    ("procuracao.updated", &["procuracaoId", "numero"]),
    ("procuracao.signed", &["procuracaoId", "numero", "dataAssinatura"]),
    ("procuracao.expired", &["procuracaoId", "numero", "dataExpiracao"]),
    ("procuracao.revogada", &["procuracaoId", "numero", "dataRevogacao"]),
    // juizes
    ("juiz.created", &["juizId", "nome"]),
    ("juiz.updated", &["juizId", "nome"]),
    ("juiz.favorited", &["juizId", "nome", "userId"]),
    ("juiz.unfavorited", &["juizId", "nome", "userId"]),
    // tarefas
    ("tarefa.created", &["tarefaId", "titulo"]),
    ("tarefa.updated", &["tarefaId", "titulo"]),
    ("tarefa.assigned", &["tarefaId", "titulo", "responsavelId", "responsavelNome"]),
    ("tarefa.completed", &["tarefaId", "titulo", "responsavelId", "responsavelNome"]),
    ("tarefa.moved", &["tarefaId", "titulo", "oldStatus", "newStatus"]),
    ("tarefa.cancelled", &["tarefaId", "titulo"]),
    // relatorios
    ("relatorio.generated", &["relatorioId", "tipo", "dataGeracao"]),
    ("relatorio.exported", &["relatorioId", "tipo", "formato"]),
    ("relatorio.scheduled", &["relatorioId", "tipo", "dataAgendamento"]),
    ("relatorio.failed", &["relatorioId", "tipo", "erro"]),
];

const DEFAULT_URGENCY: &[(&str, Urgency)] = &[
    ("prazo.expired", Urgency::Critical),
    ("prazo.expiring_2h", Urgency::Critical),
    ("prazo.expiring_1d", Urgency::Critical),
    ("pagamento.overdue", Urgency::Critical),
    ("pagamento.failed", Urgency::Critical),
    ("contrato.expired", Urgency::Critical),
    ("procuracao.expired", Urgency::Critical),
    ("sistema.critical_error", Urgency::Critical),
    ("contrato.expiring", Urgency::High),
    ("prazo.expiring_3d", Urgency::High),
    ("prazo.expiring_7d", Urgency::High),
    ("prazo.created", Urgency::High),
    ("contrato.signature_pending", Urgency::High),
    ("contrato.signed", Urgency::High),
    ("contrato.status_changed", Urgency::High),
    ("contrato.cancelled", Urgency::High),
    ("pagamento.paid", Urgency::High),
    ("pagamento.estornado", Urgency::High),
    ("honorario.paid", Urgency::High),
    ("processo.status_changed", Urgency::High),
    ("documento.rejected", Urgency::High),
    ("evento.cancelled", Urgency::High),
    ("evento.reminder_1h", Urgency::High),
    ("equipe.user_invited", Urgency::High),
    ("equipe.permissions_changed", Urgency::High),
    ("equipe.user_removed", Urgency::High),
    ("advogado.permissions_changed", Urgency::High),
    ("relatorio.failed", Urgency::High),
    ("cliente.contact_added", Urgency::Info),
    ("advogado.avatar_updated", Urgency::Info),
    ("evento.google_synced", Urgency::Info),
    ("modelo.created", Urgency::Info),
    ("modelo.updated", Urgency::Info),
    ("modelo.used", Urgency::Info),
    ("juiz.created", Urgency::Info),
    ("juiz.updated", Urgency::Info),
    ("juiz.favorited", Urgency::Info),
    ("juiz.unfavorited", Urgency::Info),
    ("relatorio.exported", Urgency::Info),
];

static REQUIRED_FIELDS_MAP: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| REQUIRED_FIELDS.iter().copied().collect());

static DEFAULT_URGENCY_MAP: LazyLock<HashMap<&'static str, Urgency>> =
    LazyLock::new(|| DEFAULT_URGENCY.iter().copied().collect());

static VALID_EVENT_TYPES: LazyLock<BTreeSet<&'static str>> = LazyLock::new(|| {
    REQUIRED_FIELDS
        .iter()
        .map(|(event_type, _)| *event_type)
        .chain(DEFAULT_URGENCY.iter().map(|(event_type, _)| *event_type))
        .collect()
});

pub struct NotificationPolicy;

impl NotificationPolicy {
    /// MEDIUM for anything not in the catalogue.
    pub fn default_urgency(event_type: &str) -> Urgency {
        DEFAULT_URGENCY_MAP
            .get(event_type)
            .copied()
            .unwrap_or(Urgency::Medium)
    }

    pub fn default_channels(event_type: &str, urgency: Option<Urgency>) -> Vec<Channel> {
        match urgency.unwrap_or_else(|| Self::default_urgency(event_type)) {
            Urgency::Critical | Urgency::High => vec![Channel::Realtime, Channel::Email],
            Urgency::Medium | Urgency::Info => vec![Channel::Realtime],
        }
    }

    pub fn required_fields(event_type: &str) -> &'static [&'static str] {
        REQUIRED_FIELDS_MAP
            .get(event_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn queue_priority(urgency: Urgency) -> u8 {
        match urgency {
            Urgency::Critical => 1,
            Urgency::High => 2,
            Urgency::Medium => 3,
            Urgency::Info => 4,
        }
    }

    /// Events whose default urgency is CRITICAL are mandatory.
    pub fn can_disable_event(event_type: &str) -> bool {
        Self::default_urgency(event_type) != Urgency::Critical
    }

    pub fn valid_event_types() -> Vec<&'static str> {
        VALID_EVENT_TYPES.iter().copied().collect()
    }

    pub fn is_known_event_type(event_type: &str) -> bool {
        VALID_EVENT_TYPES.contains(event_type)
    }

    pub fn retention_days(urgency: Urgency) -> i64 {
        RETENTION_DAYS
            .iter()
            .find(|(tier, _)| *tier == urgency)
            .map(|(_, days)| *days)
            .unwrap_or(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_fall_back_to_medium_and_no_fields() {
        assert_eq!(NotificationPolicy::default_urgency("foo.bar"), Urgency::Medium);
        assert!(NotificationPolicy::required_fields("foo.bar").is_empty());
        assert!(NotificationPolicy::can_disable_event("foo.bar"));
    }

    #[test]
    fn catalogue_is_the_union_of_both_tables() {
        assert!(NotificationPolicy::is_known_event_type("sistema.critical_error"));
        assert!(NotificationPolicy::is_known_event_type("movimentacao.updated"));
        assert!(!NotificationPolicy::is_known_event_type("sistema.unknown"));
    }
}
