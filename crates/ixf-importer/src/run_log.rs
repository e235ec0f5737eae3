//! Per-run log returned to preview callers and kept as the import attempt.

use ixf_types::{Asn, ExchangeId, IxLanId, IxfId};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

/// The peer an entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub ixlan_id: IxLanId,
    pub ix_id: ExchangeId,
    pub ix_name: String,
    pub asn: Option<Asn>,
    #[serde(default)]
    pub net_id: Option<u64>,
    #[serde(default)]
    pub ipaddr4: Option<Ipv4Addr>,
    #[serde(default)]
    pub ipaddr6: Option<Ipv6Addr>,
    #[serde(default)]
    pub speed: Option<u64>,
    #[serde(default)]
    pub is_rs_peer: Option<bool>,
    #[serde(default)]
    pub operational: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub peer: PeerInfo,
    /// `add`, `modify`, `delete`, `noop`, `ignore` or a `suggest-` variant.
    pub action: String,
    pub reason: String,
}

impl RunLogEntry {
    pub fn ixf_id(&self) -> Option<IxfId> {
        self.peer
            .asn
            .map(|asn| IxfId::new(asn, self.peer.ipaddr4, self.peer.ipaddr6))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLog {
    pub data: Vec<RunLogEntry>,
    pub errors: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: RunLogEntry) -> usize {
        self.data.push(entry);
        self.data.len() - 1
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Entries with the given action.
    pub fn with_action<'a>(&'a self, action: &'a str) -> impl Iterator<Item = &'a RunLogEntry> {
        self.data.iter().filter(move |e| e.action == action)
    }

    /// Appends another run's entries and errors.
    pub fn extend(&mut self, other: RunLog) {
        self.data.extend(other.data);
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.errors.is_empty()
    }
}
