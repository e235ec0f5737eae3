//! Proposed changes: reconciliation decisions awaiting operator action.

use chrono::{DateTime, Utc};
use ixf_common::TicketRef;
use ixf_types::{IxLanId, IxfId, ProposalId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const REASON_ENTRY_GONE_FROM_REMOTE: &str = "The entry for (asn and IPv4 and IPv6) does not exist in the exchange's IX-F data as a singular member connection";

pub const REASON_NEW_ENTRY: &str = "The entry for (asn and IPv4 and IPv6) does not exist in PeeringDB as a singular network -> ix connection";

pub const REASON_VALUES_CHANGED: &str =
    "Data differences between PeeringDB and the exchange's IX-F data";

/// What a proposal asks the network to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Add,
    Modify,
    Delete,
    Noop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Add => write!(f, "add"),
            Action::Modify => write!(f, "modify"),
            Action::Delete => write!(f, "delete"),
            Action::Noop => write!(f, "noop"),
        }
    }
}

/// Store key: one live proposal per identity per LAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalKey {
    pub ixlan_id: IxLanId,
    pub ixf_id: IxfId,
}

impl ProposalKey {
    pub const fn new(ixlan_id: IxLanId, ixf_id: IxfId) -> Self {
        ProposalKey { ixlan_id, ixf_id }
    }
}

impl fmt::Display for ProposalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on ixlan {}", self.ixf_id, self.ixlan_id)
    }
}

/// The session fields a proposal would set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProposedFields {
    pub speed: u64,
    pub operational: bool,
    pub is_rs_peer: Option<bool>,
}

/// Input of [`crate::store::ProposalStore::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalDraft {
    pub action: Action,
    pub fields: ProposedFields,
    /// Remote member entry; `Value::Null` when the remote no longer has it.
    pub data: Value,
    pub reason: String,
    pub error: Option<String>,
    pub requirement_of: Option<ProposalId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub id: ProposalId,
    pub key: ProposalKey,
    pub action: Action,
    pub fields: ProposedFields,
    #[serde(default)]
    pub data: Value,
    pub reason: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub dismissed: bool,
    /// The proposal this one is folded into.
    #[serde(default)]
    pub requirement_of: Option<ProposalId>,
    #[serde(default)]
    pub ticket: Option<TicketRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Only ever true on copies handed out by a resolve.
    #[serde(default)]
    pub resolved: bool,
}

impl ProposedChange {
    pub fn ixf_id(&self) -> &IxfId {
        &self.key.ixf_id
    }

    /// A direct apply failed validation.
    pub fn is_conflict(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_requirement(&self) -> bool {
        self.requirement_of.is_some()
    }

    /// Whether the network can do something about this proposal. Errors
    /// about prefixes or speed are the exchange's to fix.
    pub fn actionable_for_network(&self) -> bool {
        match &self.error {
            None => true,
            Some(error) => {
                let error = error.to_lowercase();
                !(error.contains("prefix") || error.contains("speed"))
            }
        }
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    /// One-line rendering for notifications and tickets.
    pub fn summary(&self) -> String {
        let mut line = format!("{} {}", self.action, self.key.ixf_id);
        if self.action != Action::Delete {
            line.push_str(&format!(
                " (speed {} Mbit/s, {}",
                self.fields.speed,
                if self.fields.operational {
                    "operational"
                } else {
                    "not operational"
                }
            ));
            if let Some(rs) = self.fields.is_rs_peer {
                line.push_str(if rs { ", RS peer" } else { ", no RS peer" });
            }
            line.push(')');
        }
        line
    }
}

impl fmt::Display for ProposedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key.ixf_id)
    }
}
