//! In-process registry state.
//!
//! Holds the records the importer reads and writes: networks, exchanges,
//! LANs, sessions with their version history, proposed changes, import
//! logs, the latest import attempt per LAN and the mail and ticket ledgers.
//! The whole state round-trips through one JSON file.
//!
//! Session writes always go through [`Registry::write_session`] so every
//! change leaves a version behind.

pub mod model;
pub mod validation;
pub mod versions;

pub use model::{
    Delivery, EmailRecord, Exchange, ImportAttempt, IxLan, LanPrefix, MailTarget, Session,
    SessionStatus, TicketRecord,
};
pub use validation::FieldErrors;
pub use versions::{Version, VersionStore};

use crate::import_log::ImportLogBook;
use crate::store::ProposalStore;
use chrono::{DateTime, Utc};
use ixf_common::{IxfError, IxfResult, Network, NetworkDirectory};
use ixf_types::{Asn, ExchangeId, IxLanId, IxfId, SessionId, VersionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    networks: BTreeMap<Asn, Network>,
    #[serde(default)]
    exchanges: BTreeMap<ExchangeId, Exchange>,
    #[serde(default)]
    ixlans: BTreeMap<IxLanId, IxLan>,
    #[serde(default)]
    sessions: BTreeMap<SessionId, Session>,
    #[serde(default)]
    next_session_id: u64,
    #[serde(default)]
    versions: VersionStore,
    #[serde(default)]
    proposals: ProposalStore,
    #[serde(default)]
    import_logs: ImportLogBook,
    #[serde(default)]
    attempts: BTreeMap<IxLanId, ImportAttempt>,
    #[serde(default)]
    emails: Vec<EmailRecord>,
    #[serde(default)]
    tickets: Vec<TicketRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the state file, starting empty if it does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> IxfResult<Self> {
        let path = path.as_ref();
        match fs::read(path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "State file not found, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(IxfError::Io(e)),
        }
    }

    /// Writes the state file through a temporary file and a rename.
    pub fn save(&self, path: impl AsRef<Path>) -> IxfResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "State saved");
        Ok(())
    }

    /// Runs `f` against the registry; if it fails, every change it made is
    /// undone.
    pub fn transaction<T, E>(
        &mut self,
        f: impl FnOnce(&mut Registry) -> Result<T, E>,
    ) -> Result<T, E> {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    // Networks

    pub fn add_network(&mut self, network: Network) {
        self.networks.insert(network.asn, network);
    }

    pub fn network_mut(&mut self, asn: Asn) -> Option<&mut Network> {
        self.networks.get_mut(&asn)
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.values()
    }

    // Exchanges and LANs

    pub fn add_exchange(&mut self, exchange: Exchange) {
        self.exchanges.insert(exchange.id, exchange);
    }

    pub fn exchange(&self, id: ExchangeId) -> Option<&Exchange> {
        self.exchanges.get(&id)
    }

    pub fn exchange_mut(&mut self, id: ExchangeId) -> Option<&mut Exchange> {
        self.exchanges.get_mut(&id)
    }

    pub fn add_ixlan(&mut self, ixlan: IxLan) {
        self.ixlans.insert(ixlan.id, ixlan);
    }

    pub fn ixlan(&self, id: IxLanId) -> Option<&IxLan> {
        self.ixlans.get(&id)
    }

    pub fn ixlan_mut(&mut self, id: IxLanId) -> Option<&mut IxLan> {
        self.ixlans.get_mut(&id)
    }

    pub fn ixlans(&self) -> impl Iterator<Item = &IxLan> {
        self.ixlans.values()
    }

    /// Exchange of a LAN.
    pub fn exchange_of(&self, ixlan_id: IxLanId) -> Option<&Exchange> {
        self.ixlan(ixlan_id)
            .and_then(|lan| self.exchange(lan.exchange_id))
    }

    // Sessions

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn active_sessions_on(&self, ixlan_id: IxLanId) -> impl Iterator<Item = &Session> {
        self.sessions
            .values()
            .filter(move |s| s.ixlan_id == ixlan_id && s.is_active())
    }

    /// Session on `ixlan_id` with exactly this identity. An active session
    /// wins over soft deleted ones; among deleted ones the newest wins.
    pub fn find_session(&self, ixlan_id: IxLanId, ixf_id: &IxfId) -> Option<&Session> {
        let mut matching = self
            .sessions
            .values()
            .filter(|s| s.ixlan_id == ixlan_id && &s.ixf_id() == ixf_id);
        let mut found: Option<&Session> = None;
        for session in matching.by_ref() {
            if session.is_active() {
                return Some(session);
            }
            found = Some(session);
        }
        found
    }

    pub fn allocate_session_id(&mut self) -> SessionId {
        let floor = self.sessions.keys().last().map(|id| id.value()).unwrap_or(0);
        self.next_session_id = self.next_session_id.max(floor) + 1;
        SessionId::new(self.next_session_id)
    }

    /// Inserts or replaces a session and records a version of it.
    pub fn write_session(
        &mut self,
        mut session: Session,
        comment: impl Into<String>,
        rollback_of: Option<VersionId>,
        now: DateTime<Utc>,
    ) -> VersionId {
        session.updated_at = now;
        let version = self
            .versions
            .record(&session, Some(comment.into()), rollback_of, now);
        self.sessions.insert(session.id, session);
        version
    }

    /// Creates an active session outside of any import, for seeding state.
    #[allow(clippy::too_many_arguments)]
    pub fn add_session(
        &mut self,
        ixlan_id: IxLanId,
        asn: Asn,
        ipv4: Option<Ipv4Addr>,
        ipv6: Option<Ipv6Addr>,
        speed: u64,
        is_rs_peer: bool,
        now: DateTime<Utc>,
    ) -> SessionId {
        let id = self.allocate_session_id();
        let session = Session {
            id,
            ixlan_id,
            asn,
            ipv4,
            ipv6,
            speed,
            operational: true,
            is_rs_peer,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.write_session(session, "created", None, now);
        id
    }

    /// Applies `f` to a session and records the result.
    pub fn update_session(
        &mut self,
        id: SessionId,
        comment: impl Into<String>,
        now: DateTime<Utc>,
        f: impl FnOnce(&mut Session),
    ) -> IxfResult<VersionId> {
        let mut session = self
            .session(id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("session", id))?;
        f(&mut session);
        Ok(self.write_session(session, comment, None, now))
    }

    /// Soft deletes a session.
    pub fn delete_session(
        &mut self,
        id: SessionId,
        comment: impl Into<String>,
        now: DateTime<Utc>,
    ) -> IxfResult<VersionId> {
        self.update_session(id, comment, now, |s| s.status = SessionStatus::Deleted)
    }

    pub fn versions(&self) -> &VersionStore {
        &self.versions
    }

    // Proposals, logs, attempts

    pub fn proposals(&self) -> &ProposalStore {
        &self.proposals
    }

    pub fn proposals_mut(&mut self) -> &mut ProposalStore {
        &mut self.proposals
    }

    pub fn import_logs(&self) -> &ImportLogBook {
        &self.import_logs
    }

    pub fn import_logs_mut(&mut self) -> &mut ImportLogBook {
        &mut self.import_logs
    }

    pub fn attempt(&self, ixlan_id: IxLanId) -> Option<&ImportAttempt> {
        self.attempts.get(&ixlan_id)
    }

    /// Replaces the previous attempt of the same LAN.
    pub fn set_attempt(&mut self, attempt: ImportAttempt) {
        self.attempts.insert(attempt.ixlan_id, attempt);
    }

    // Mail and ticket ledgers

    pub fn emails(&self) -> &[EmailRecord] {
        &self.emails
    }

    pub fn emails_mut(&mut self) -> &mut Vec<EmailRecord> {
        &mut self.emails
    }

    pub fn record_email(&mut self, mut record: EmailRecord) -> u64 {
        let id = self.emails.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        record.id = id;
        self.emails.push(record);
        id
    }

    pub fn clear_emails(&mut self) -> usize {
        let count = self.emails.len();
        self.emails.clear();
        for ixlan in self.ixlans.values_mut() {
            ixlan.import_error_notified = None;
        }
        count
    }

    pub fn tickets(&self) -> &[TicketRecord] {
        &self.tickets
    }

    pub fn record_ticket(&mut self, record: TicketRecord) {
        self.tickets.push(record);
    }

    pub fn ticket_by_subject(&self, subject: &str) -> Option<&TicketRecord> {
        self.tickets.iter().find(|t| t.subject == subject)
    }

    /// Forgets every ticket, including the refs held by proposals.
    pub fn clear_tickets(&mut self) -> usize {
        let count = self.tickets.len();
        self.tickets.clear();
        self.proposals.reset_tickets();
        count
    }
}

impl NetworkDirectory for Registry {
    fn network(&self, asn: Asn) -> Option<&Network> {
        self.networks.get(&asn)
    }
}
