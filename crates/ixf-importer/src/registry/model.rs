//! Persisted record kinds owned by the registry.

use crate::run_log::RunLog;
use chrono::{DateTime, Utc};
use ixf_common::{EntityStatus, TicketRef};
use ixf_types::{Asn, ExchangeId, IpPrefix, IpProtocol, IxLanId, IxfId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Internet exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: ExchangeId,
    pub name: String,
    #[serde(default)]
    pub tech_email: Option<String>,
    #[serde(default)]
    pub policy_email: Option<String>,
    #[serde(default)]
    pub last_import: Option<DateTime<Utc>>,
    #[serde(default)]
    pub net_count: usize,
}

impl Exchange {
    pub fn new(id: ExchangeId, name: impl Into<String>) -> Self {
        Exchange {
            id,
            name: name.into(),
            tech_email: None,
            policy_email: None,
            last_import: None,
            net_count: 0,
        }
    }

    /// Technical contact, falling back to the policy contact.
    pub fn contacts(&self) -> Vec<String> {
        [&self.tech_email, &self.policy_email]
            .into_iter()
            .flatten()
            .map(|email| email.trim())
            .find(|email| !email.is_empty())
            .map(|email| vec![email.to_string()])
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanPrefix {
    pub prefix: IpPrefix,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Exchange LAN with its member list settings and import state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IxLan {
    pub id: IxLanId,
    pub exchange_id: ExchangeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub member_list_url: Option<String>,
    #[serde(default)]
    pub import_enabled: bool,
    #[serde(default)]
    pub status: EntityStatus,
    #[serde(default)]
    pub prefixes: Vec<LanPrefix>,
    /// Last feed level error, kept until a healthy import.
    #[serde(default)]
    pub import_error: Option<String>,
    /// When the exchange was last told about `import_error`.
    #[serde(default)]
    pub import_error_notified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub protocol_conflict: Option<IpProtocol>,
}

impl IxLan {
    pub fn new(id: IxLanId, exchange_id: ExchangeId) -> Self {
        IxLan {
            id,
            exchange_id,
            name: String::new(),
            member_list_url: None,
            import_enabled: true,
            status: EntityStatus::Ok,
            prefixes: Vec::new(),
            import_error: None,
            import_error_notified: None,
            protocol_conflict: None,
        }
    }

    pub fn active_prefixes(&self) -> impl Iterator<Item = &IpPrefix> {
        self.prefixes.iter().filter(|p| p.active).map(|p| &p.prefix)
    }

    /// Returns true if `addr` lies inside one of the active prefixes.
    pub fn admits(&self, addr: &IpAddr) -> bool {
        self.active_prefixes().any(|p| p.contains(addr))
    }

    pub fn url(&self) -> &str {
        self.member_list_url.as_deref().unwrap_or("")
    }

    /// Eligible for scheduled imports.
    pub fn importable(&self) -> bool {
        self.import_enabled
            && self.status == EntityStatus::Ok
            && self
                .member_list_url
                .as_deref()
                .is_some_and(|url| !url.trim().is_empty())
    }
}

/// Local session state. Deletion is soft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Active,
    Deleted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A network's peering presence on an exchange LAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub ixlan_id: IxLanId,
    pub asn: Asn,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    /// Port speed in Mbit/s.
    pub speed: u64,
    pub operational: bool,
    pub is_rs_peer: bool,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn ixf_id(&self) -> IxfId {
        IxfId::new(self.asn, self.ipv4, self.ipv6)
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        self.ixf_id().addresses()
    }
}

/// Latest import attempt of one LAN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportAttempt {
    pub ixlan_id: IxLanId,
    pub fetched_at: DateTime<Utc>,
    pub log: RunLog,
}

/// Who a rendered mail was meant for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum MailTarget {
    Exchange(ExchangeId),
    Network(Asn),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    Sent,
    Failed,
    /// Delivery disabled by configuration.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: u64,
    pub target: MailTarget,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub delivery: Delivery,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub subject: String,
    pub ticket_ref: TicketRef,
    pub created_at: DateTime<Utc>,
}
