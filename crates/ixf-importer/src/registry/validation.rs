//! Validation of session writes on the direct apply path.

use super::model::Session;
use super::Registry;
use ixf_common::DataQualityConfig;
use ixf_types::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// Field name to message map of failed checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// JSON rendering stored on proposed changes.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    pub fn into_result(self) -> Result<(), FieldErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, message)| format!("{}: {}", field, message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

fn address_field(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "ipaddr4",
        IpAddr::V6(_) => "ipaddr6",
    }
}

fn protocol_name(addr: &IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "IPv4",
        IpAddr::V6(_) => "IPv6",
    }
}

impl Registry {
    /// Checks a session about to be written: addresses inside the LAN's
    /// active prefixes and not held by another active session, speed inside
    /// the configured bounds (0 means unknown and is accepted).
    pub fn validate_session(
        &self,
        candidate: &Session,
        limits: &DataQualityConfig,
    ) -> Result<(), FieldErrors> {
        self.validate_replacement(candidate, &[], limits)
    }

    /// Like [`Registry::validate_session`], with the `released` sessions
    /// treated as already deleted.
    pub fn validate_replacement(
        &self,
        candidate: &Session,
        released: &[SessionId],
        limits: &DataQualityConfig,
    ) -> Result<(), FieldErrors> {
        let mut errors = FieldErrors::new();

        let Some(ixlan) = self.ixlan(candidate.ixlan_id) else {
            errors.add("ixlan", format!("Exchange LAN {} does not exist", candidate.ixlan_id));
            return Err(errors);
        };

        for addr in candidate.addresses() {
            if !ixlan.admits(&addr) {
                errors.add(
                    address_field(&addr),
                    format!(
                        "{} {} does not match any prefix on this ixlan",
                        protocol_name(&addr),
                        addr
                    ),
                );
                continue;
            }

            let holder = self
                .sessions()
                .filter(|s| s.is_active() && s.id != candidate.id && !released.contains(&s.id))
                .find(|s| s.addresses().any(|a| a == addr));

            if let Some(holder) = holder {
                let message = if holder.ixlan_id == candidate.ixlan_id {
                    "Ip address already exists elsewhere"
                } else {
                    "Ip address already exists in another lan"
                };
                errors.add(address_field(&addr), message);
            }
        }

        if candidate.speed != 0 {
            if candidate.speed < limits.min_speed {
                errors.add(
                    "speed",
                    format!("Speed must be at least {} Mbit/s", limits.min_speed),
                );
            } else if candidate.speed > limits.max_speed {
                errors.add(
                    "speed",
                    format!("Speed must not exceed {} Mbit/s", limits.max_speed),
                );
            }
        }

        errors.into_result()
    }
}
