//! Networks, their contacts and the read-only directory lookup.

use ixf_types::Asn;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Record status as kept by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    #[default]
    Ok,
    Pending,
    Deleted,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityStatus::Ok => write!(f, "ok"),
            EntityStatus::Pending => write!(f, "pending"),
            EntityStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// Contact role, in notification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContactRole {
    Technical,
    #[serde(rename = "NOC")]
    Noc,
    Policy,
    Abuse,
    Maintenance,
    Sales,
    Public,
}

impl ContactRole {
    /// Roles that receive importer notifications.
    pub fn receives_notifications(&self) -> bool {
        matches!(
            self,
            ContactRole::Technical | ContactRole::Noc | ContactRole::Policy
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub role: ContactRole,
    pub email: String,
}

/// A network as seen by the importer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: u64,
    pub asn: Asn,
    pub name: String,
    #[serde(default)]
    pub status: EntityStatus,
    /// Exchange originated changes are applied without review.
    #[serde(default)]
    pub allow_ixp_update: bool,
    #[serde(default)]
    pub info_unicast: bool,
    #[serde(default)]
    pub info_ipv6: bool,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

impl Network {
    pub fn new(id: u64, asn: Asn, name: impl Into<String>) -> Self {
        Network {
            id,
            asn,
            name: name.into(),
            status: EntityStatus::Ok,
            allow_ixp_update: false,
            info_unicast: true,
            info_ipv6: true,
            contacts: Vec::new(),
        }
    }

    /// A network that declares neither protocol is assumed to run both.
    pub fn ipv4_support(&self) -> bool {
        self.info_unicast || !self.info_ipv6
    }

    pub fn ipv6_support(&self) -> bool {
        self.info_ipv6 || !self.info_unicast
    }

    /// Notification recipients ordered by role priority, without duplicates.
    pub fn notification_contacts(&self) -> Vec<String> {
        let mut contacts: Vec<&Contact> = self
            .contacts
            .iter()
            .filter(|c| c.role.receives_notifications() && !c.email.trim().is_empty())
            .collect();
        contacts.sort_by_key(|c| c.role);

        let mut emails: Vec<String> = Vec::new();
        for contact in contacts {
            let email = contact.email.trim().to_string();
            if !emails.contains(&email) {
                emails.push(email);
            }
        }
        emails
    }
}

/// Read-only lookup of networks by ASN.
pub trait NetworkDirectory {
    fn network(&self, asn: Asn) -> Option<&Network>;
}
