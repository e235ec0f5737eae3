//! Escalation notifier.
//!
//! Notifications queued by the reconciler during a batch are flushed once
//! at the end: one consolidated message per exchange and one per network.
//! Recipients without contacts get a consolidated ticket instead. Aged
//! proposals are escalated to tickets, and tickets of proposals that were
//! resolved get a closing update.

use crate::proposal::{Action, ProposedChange};
use crate::registry::{Delivery, EmailRecord, Exchange, MailTarget, Registry, TicketRecord};
use chrono::{DateTime, Utc};
use ixf_common::{ImporterConfig, MailSink, NetworkDirectory, TicketRef, TicketSink};
use ixf_types::{Asn, ExchangeId, IpProtocol, IxLanId, IxfId, ProposalId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, instrument, warn};

/// Prepended to mail that is resent after a failed delivery.
pub const STALE_NOTICE: &str = "This email could not be delivered initially and may contain stale information.\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Add,
    Modify,
    Delete,
    /// A direct apply failed validation.
    Conflict,
    /// A ticketed proposal went away.
    Resolved,
    ProtocolConflict,
    /// The exchange's feed could not be processed.
    SourceError,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NotificationKind::Add => "add",
            NotificationKind::Modify => "modify",
            NotificationKind::Delete => "delete",
            NotificationKind::Conflict => "conflict",
            NotificationKind::Resolved => "resolved",
            NotificationKind::ProtocolConflict => "protocol-conflict",
            NotificationKind::SourceError => "source-error",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub ixlan_id: IxLanId,
    pub exchange_id: ExchangeId,
    pub exchange_name: String,
    pub asn: Option<Asn>,
    pub proposal: Option<ProposalId>,
    pub summary: String,
    pub reason: String,
    /// The network can act on it.
    pub actionable: bool,
    pub ticket: Option<TicketRef>,
}

impl Notification {
    pub fn for_proposal(exchange: &Exchange, proposal: &ProposedChange, conflict: bool) -> Self {
        let kind = match (conflict, proposal.action) {
            (true, _) => NotificationKind::Conflict,
            (false, Action::Add) => NotificationKind::Add,
            (false, Action::Delete) => NotificationKind::Delete,
            (false, _) => NotificationKind::Modify,
        };
        let reason = match &proposal.error {
            Some(error) => format!("{} ({})", proposal.reason, error),
            None => proposal.reason.clone(),
        };
        Notification {
            kind,
            ixlan_id: proposal.key.ixlan_id,
            exchange_id: exchange.id,
            exchange_name: exchange.name.clone(),
            asn: Some(proposal.key.ixf_id.asn),
            proposal: Some(proposal.id),
            summary: proposal.summary(),
            reason,
            actionable: proposal.actionable_for_network(),
            ticket: proposal.ticket.clone(),
        }
    }

    pub fn resolved(exchange: &Exchange, proposal: &ProposedChange) -> Self {
        Notification {
            kind: NotificationKind::Resolved,
            ..Self::for_proposal(exchange, proposal, false)
        }
    }

    pub fn protocol_conflict(
        exchange: &Exchange,
        ixlan_id: IxLanId,
        ixf_id: &IxfId,
        protocol: IpProtocol,
    ) -> Self {
        Notification {
            kind: NotificationKind::ProtocolConflict,
            ixlan_id,
            exchange_id: exchange.id,
            exchange_name: exchange.name.clone(),
            asn: Some(ixf_id.asn),
            proposal: None,
            summary: ixf_id.to_string(),
            reason: format!(
                "The IX-F data contains an {} address, but the network has {} disabled",
                protocol, protocol
            ),
            actionable: true,
            ticket: None,
        }
    }

    pub fn source_error(exchange: &Exchange, ixlan_id: IxLanId, message: impl Into<String>) -> Self {
        Notification {
            kind: NotificationKind::SourceError,
            ixlan_id,
            exchange_id: exchange.id,
            exchange_name: exchange.name.clone(),
            asn: None,
            proposal: None,
            summary: String::new(),
            reason: message.into(),
            actionable: false,
            ticket: None,
        }
    }

    /// Part of the exchange's consolidated message.
    fn to_exchange(&self) -> bool {
        matches!(
            self.kind,
            NotificationKind::Add
                | NotificationKind::Modify
                | NotificationKind::Delete
                | NotificationKind::Conflict
                | NotificationKind::ProtocolConflict
        )
    }

    /// Part of the network's consolidated message.
    fn to_network(&self) -> bool {
        match self.kind {
            NotificationKind::Add
            | NotificationKind::Modify
            | NotificationKind::Delete
            | NotificationKind::ProtocolConflict => true,
            NotificationKind::Conflict => self.actionable,
            NotificationKind::Resolved | NotificationKind::SourceError => false,
        }
    }

    fn render(&self) -> String {
        let mut line = format!("- [{}] {}", self.kind, self.exchange_name);
        if !self.summary.is_empty() {
            line.push_str(&format!(": {}", self.summary));
        }
        line.push_str(&format!("\n  Reason: {}\n", self.reason));
        line
    }
}

/// Counters of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    pub emails_sent: usize,
    pub emails_failed: usize,
    pub emails_suppressed: usize,
    pub tickets_created: usize,
    pub tickets_updated: usize,
    /// Ticket sink calls that failed; the work is retried on a later run.
    pub tickets_failed: usize,
}

impl NotifyReport {
    fn count(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Sent => self.emails_sent += 1,
            Delivery::Failed => self.emails_failed += 1,
            Delivery::Suppressed => self.emails_suppressed += 1,
        }
    }

    pub fn merge(&mut self, other: NotifyReport) {
        self.emails_sent += other.emails_sent;
        self.emails_failed += other.emails_failed;
        self.emails_suppressed += other.emails_suppressed;
        self.tickets_created += other.tickets_created;
        self.tickets_updated += other.tickets_updated;
        self.tickets_failed += other.tickets_failed;
    }
}

pub struct EscalationNotifier<'a> {
    config: &'a ImporterConfig,
    mail: &'a dyn MailSink,
    tickets: &'a dyn TicketSink,
}

impl<'a> EscalationNotifier<'a> {
    pub fn new(config: &'a ImporterConfig, mail: &'a dyn MailSink, tickets: &'a dyn TicketSink) -> Self {
        EscalationNotifier {
            config,
            mail,
            tickets,
        }
    }

    fn ticket_subject(&self, title: impl fmt::Display) -> String {
        format!("{}[IX-F] {}", self.config.notify.subject_prefix, title)
    }

    /// Delivers the notifications accumulated over a batch. Sink failures
    /// are logged and counted, never returned.
    #[instrument(skip_all, fields(count = notifications.len()))]
    pub async fn flush(
        &self,
        registry: &mut Registry,
        notifications: Vec<Notification>,
        now: DateTime<Utc>,
    ) -> NotifyReport {
        let mut report = NotifyReport::default();

        for notification in notifications.iter().filter(|n| n.kind == NotificationKind::Resolved) {
            if let Some(ticket) = &notification.ticket {
                let text = format!("Resolved: {} is no longer reported.", notification.summary);
                match self.tickets.append_to_ticket(ticket, &text).await {
                    Ok(()) => report.tickets_updated += 1,
                    Err(e) => {
                        warn!(ticket = %ticket, error = %e, "Could not update ticket");
                        report.tickets_failed += 1;
                    }
                }
            }
        }

        for notification in notifications.iter().filter(|n| n.kind == NotificationKind::SourceError) {
            self.source_error(registry, notification, now, &mut report).await;
        }

        let mut by_exchange: BTreeMap<ExchangeId, Vec<&Notification>> = BTreeMap::new();
        let mut by_network: BTreeMap<Asn, Vec<&Notification>> = BTreeMap::new();
        for notification in &notifications {
            if notification.to_exchange() {
                by_exchange
                    .entry(notification.exchange_id)
                    .or_default()
                    .push(notification);
            }
            if let Some(asn) = notification.asn.filter(|_| notification.to_network()) {
                by_network.entry(asn).or_default().push(notification);
            }
        }

        for (exchange_id, items) in by_exchange {
            let Some(exchange) = registry.exchange(exchange_id).cloned() else {
                warn!(exchange = %exchange_id, "Notification for unknown exchange dropped");
                continue;
            };
            let subject = format!(
                "PeeringDB: Action May Be Needed: IX-F Importer data mismatch between {} and one or more networks",
                exchange.name
            );
            let body = render_body(&items);
            let recipients = exchange.contacts();
            if recipients.is_empty() {
                let title = format!("Several Actions May Be Needed for Exchange {}", exchange.name);
                self.consolidated_ticket(registry, &title, &body, now, &mut report)
                    .await;
                continue;
            }
            let delivery = self
                .deliver(registry, MailTarget::Exchange(exchange_id), recipients, subject, body, now)
                .await;
            report.count(delivery);
        }

        for (asn, items) in by_network {
            let Some(network) = registry.network(asn).cloned() else {
                continue;
            };
            let subject = format!(
                "PeeringDB: Action May Be Needed: IX-F Importer data mismatch between AS{} and one or more IXPs",
                asn
            );
            let body = render_body(&items);
            let recipients = network.notification_contacts();
            if recipients.is_empty() {
                let title = format!("Several Actions May Be Needed for Network {} AS{}", network.name, asn);
                self.consolidated_ticket(registry, &title, &body, now, &mut report)
                    .await;
                continue;
            }
            let delivery = self
                .deliver(registry, MailTarget::Network(asn), recipients, subject, body, now)
                .await;
            report.count(delivery);
        }

        info!(
            sent = report.emails_sent,
            failed = report.emails_failed,
            suppressed = report.emails_suppressed,
            tickets = report.tickets_created,
            tickets_failed = report.tickets_failed,
            "Notifications flushed"
        );
        report
    }

    async fn source_error(
        &self,
        registry: &mut Registry,
        notification: &Notification,
        now: DateTime<Utc>,
        report: &mut NotifyReport,
    ) {
        let Some(exchange) = registry.exchange(notification.exchange_id).cloned() else {
            return;
        };
        let subject = format!("Could not process IX-F Data - {} ({})", exchange.name, exchange.id);
        let body = format!(
            "The IX-F member list of {} (ixlan {}) could not be imported:\n\n{}\n",
            exchange.name, notification.ixlan_id, notification.reason
        );

        let cutoff = now - self.config.error_notification_period();
        let recent = registry
            .emails()
            .iter()
            .any(|e| e.subject == subject && e.body == body && e.created_at > cutoff);
        if recent {
            debug!(exchange = %exchange.id, "Identical error notice sent recently");
            return;
        }

        let recipients = exchange.contacts();
        if recipients.is_empty() {
            warn!(exchange = %exchange.id, "No contact for error notice");
            return;
        }
        let delivery = self
            .deliver(registry, MailTarget::Exchange(exchange.id), recipients, subject, body, now)
            .await;
        report.count(delivery);
    }

    /// Hands a message to the mail sink if delivery to the target is
    /// enabled, and records it either way.
    async fn deliver(
        &self,
        registry: &mut Registry,
        target: MailTarget,
        recipients: Vec<String>,
        subject: String,
        body: String,
        now: DateTime<Utc>,
    ) -> Delivery {
        let enabled = match target {
            MailTarget::Exchange(_) => self.config.notify.notify_ix,
            MailTarget::Network(_) => self.config.notify.notify_net,
        };

        let delivery = if !enabled {
            debug!(?target, subject = %subject, "Mail delivery disabled");
            Delivery::Suppressed
        } else {
            match self.mail.send(&recipients, &subject, &body).await {
                Ok(()) => Delivery::Sent,
                Err(e) => {
                    warn!(?target, error = %e, "Mail delivery failed");
                    Delivery::Failed
                }
            }
        };

        registry.record_email(EmailRecord {
            id: 0,
            target,
            recipients,
            subject,
            body,
            created_at: now,
            delivery,
            sent_at: (delivery == Delivery::Sent).then_some(now),
        });
        delivery
    }

    async fn consolidated_ticket(
        &self,
        registry: &mut Registry,
        title: &str,
        body: &str,
        now: DateTime<Utc>,
        report: &mut NotifyReport,
    ) {
        if !self.config.notify.tickets_on_conflict {
            debug!(title, "No contacts and tickets disabled");
            return;
        }
        let subject = self.ticket_subject(title);
        self.open_or_update(registry, &subject, body, now, report)
            .await;
    }

    /// Appends to the ticket recorded under `subject`, or opens one. `None`
    /// when the ticket sink failed.
    async fn open_or_update(
        &self,
        registry: &mut Registry,
        subject: &str,
        body: &str,
        now: DateTime<Utc>,
        report: &mut NotifyReport,
    ) -> Option<TicketRef> {
        if let Some(existing) = registry.ticket_by_subject(subject) {
            let ticket_ref = existing.ticket_ref.clone();
            if let Err(e) = self.tickets.append_to_ticket(&ticket_ref, body).await {
                warn!(ticket = %ticket_ref, error = %e, "Could not update ticket");
                report.tickets_failed += 1;
                return None;
            }
            report.tickets_updated += 1;
            return Some(ticket_ref);
        }

        let ticket_ref = match self.tickets.create_ticket(subject, body).await {
            Ok(ticket_ref) => ticket_ref,
            Err(e) => {
                warn!(subject, error = %e, "Could not open ticket");
                report.tickets_failed += 1;
                return None;
            }
        };
        registry.record_ticket(TicketRecord {
            subject: subject.to_string(),
            ticket_ref: ticket_ref.clone(),
            created_at: now,
        });
        report.tickets_created += 1;
        Some(ticket_ref)
    }

    /// Opens a ticket for every proposal older than the configured number
    /// of days that still has none.
    #[instrument(skip_all)]
    pub async fn escalate_aged(&self, registry: &mut Registry, now: DateTime<Utc>) -> NotifyReport {
        let mut report = NotifyReport::default();
        if !self.config.notify.tickets_on_conflict {
            return report;
        }

        for id in registry.proposals().aged(now, self.config.ticket_after()) {
            let Some(proposal) = registry.proposals().get(id).cloned() else {
                continue;
            };
            let exchange = registry
                .exchange_of(proposal.key.ixlan_id)
                .map(|e| e.name.clone())
                .unwrap_or_default();
            let subject = self.ticket_subject(format!("{} IX-F Conflict Resolution", proposal));
            let body = format!(
                "A proposed change from the IX-F data of {} has been unresolved for {} days.\n\n{}\nReason: {}\n",
                exchange,
                proposal.age_days(now),
                proposal.summary(),
                proposal.reason
            );

            let Some(ticket_ref) = self
                .open_or_update(registry, &subject, &body, now, &mut report)
                .await
            else {
                continue;
            };
            info!(proposal = %proposal.id, ticket = %ticket_ref, "Aged proposal escalated");
            registry.proposals_mut().set_ticket(id, ticket_ref);
        }

        report
    }

    /// Retries mail that could not be delivered before.
    pub async fn resend_failed(&self, registry: &mut Registry, now: DateTime<Utc>) -> NotifyReport {
        let mut report = NotifyReport::default();
        if !self.config.notify.resend_failed_emails {
            return report;
        }

        let failed: Vec<usize> = registry
            .emails()
            .iter()
            .enumerate()
            .filter(|(_, e)| e.delivery == Delivery::Failed)
            .map(|(index, _)| index)
            .collect();

        for index in failed {
            let Some(record) = registry.emails().get(index).cloned() else {
                continue;
            };
            let body = format!("{}{}", STALE_NOTICE, record.body);
            match self.mail.send(&record.recipients, &record.subject, &body).await {
                Ok(()) => {
                    if let Some(stored) = registry.emails_mut().get_mut(index) {
                        stored.delivery = Delivery::Sent;
                        stored.sent_at = Some(now);
                    }
                    report.emails_sent += 1;
                }
                Err(e) => {
                    warn!(email = record.id, error = %e, "Resend failed");
                    report.emails_failed += 1;
                }
            }
        }

        report
    }
}

fn render_body(items: &[&Notification]) -> String {
    let mut body = String::from(
        "The IX-F importer found differences between PeeringDB and the IX-F member data:\n\n",
    );
    for item in items {
        body.push_str(&item.render());
    }
    body
}
