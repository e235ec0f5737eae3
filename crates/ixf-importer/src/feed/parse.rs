//! Flattens a sanitized member list into remote records.

use super::schema::{Connection, MemberEntry, VlanAddress, VlanEntry};
use ixf_common::IxfError;
use ixf_types::{Asn, IxfId};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};

/// Member types that are imported. A missing type counts as allowed.
pub const ALLOWED_MEMBER_TYPES: &[&str] = &["peering", "probono", "routeserver", "other"];

/// Connection states that are imported. A missing or empty state counts as
/// `active`.
pub const ALLOWED_CONNECTION_STATES: &[&str] = &["active", "inactive", "connected", "operational"];

/// One member connection as published by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    pub ixf_id: IxfId,
    pub vlan_id: Option<u64>,
    /// Sum of the parsed interface speeds in Mbit/s.
    pub speed: u64,
    /// Interface speeds that could not be parsed.
    pub speed_errors: Vec<String>,
    pub operational: bool,
    pub is_rs_peer: Option<bool>,
    pub state: String,
    /// The member entry this record was built from.
    pub data: Value,
}

/// Why a member entry or connection was not turned into records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub asn: Option<Asn>,
    pub reason: String,
}

/// Output of [`parse`].
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub records: Vec<RemoteRecord>,
    /// Every identity that parsed successfully.
    pub seen: HashSet<IxfId>,
    /// Record level errors, in feed order.
    pub errors: Vec<String>,
    /// Address parse errors, reported to the exchange.
    pub invalid_ips: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
}

pub fn parse(data: &Value) -> ParsedFeed {
    let mut parsed = ParsedFeed::default();

    let members = data
        .get("member_list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    for raw in members {
        let member: MemberEntry = match serde_json::from_value(raw.clone()) {
            Ok(member) => member,
            Err(e) => {
                let message = format!("Member entry could not be read: {}", e);
                warn!(error = %e, "Skipping unreadable member entry");
                parsed.errors.push(message);
                continue;
            }
        };

        let Some(asn) = parse_asn(&member.asnum) else {
            let message = format!("Invalid asnum: {}", member.asnum);
            warn!(asnum = %member.asnum, "Skipping member with invalid asnum");
            parsed.errors.push(message);
            continue;
        };

        let member_type = member.member_type.as_deref().unwrap_or("").to_lowercase();
        if !member_type.is_empty() && !ALLOWED_MEMBER_TYPES.contains(&member_type.as_str()) {
            debug!(asn = %asn, member_type, "Skipping member with disallowed type");
            parsed.skipped.push(SkippedEntry {
                asn: Some(asn),
                reason: format!("Invalid member type: {}", member_type),
            });
            continue;
        }

        for connection in &member.connection_list {
            parse_connection(&mut parsed, asn, connection, raw);
        }
    }

    parsed
}

fn parse_asn(value: &Value) -> Option<Asn> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| Asn::from_u64(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_connection(parsed: &mut ParsedFeed, asn: Asn, connection: &Connection, raw: &Value) {
    let state = connection
        .state
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("active")
        .to_lowercase();

    if !ALLOWED_CONNECTION_STATES.contains(&state.as_str()) {
        debug!(asn = %asn, state, "Skipping connection with disallowed state");
        parsed.skipped.push(SkippedEntry {
            asn: Some(asn),
            reason: format!("Invalid connection state: {}", state),
        });
        return;
    }

    let (speed, speed_errors) = parse_speed(connection);
    parsed.errors.extend(speed_errors.iter().cloned());

    for vlan in &connection.vlan_list {
        let Some(ixf_id) = parse_identity(parsed, asn, vlan) else {
            continue;
        };

        if !parsed.seen.insert(ixf_id) {
            let message = format!("Duplicate entry for {} ignored", ixf_id);
            warn!(ixf_id = %ixf_id, "Duplicate member connection");
            parsed.errors.push(message);
            continue;
        }

        parsed.records.push(RemoteRecord {
            ixf_id,
            vlan_id: vlan.vlan_id(),
            speed,
            speed_errors: speed_errors.clone(),
            operational: state != "inactive",
            is_rs_peer: is_rs_peer(vlan),
            state: state.clone(),
            data: raw.clone(),
        });
    }
}

fn is_rs_peer(vlan: &VlanEntry) -> Option<bool> {
    vlan.ipv4
        .as_ref()
        .and_then(|v| v.routeserver)
        .or_else(|| vlan.ipv6.as_ref().and_then(|v| v.routeserver))
}

fn parse_identity(parsed: &mut ParsedFeed, asn: Asn, vlan: &VlanEntry) -> Option<IxfId> {
    let ipv4_raw = address_string(vlan.ipv4.as_ref());
    let ipv6_raw = address_string(vlan.ipv6.as_ref());

    if ipv4_raw.is_none() && ipv6_raw.is_none() {
        let message = format!(
            "Could not find ipv4 or 6 address in vlan_list entry for vlan_id {} (AS{})",
            vlan.vlan_id_display(),
            asn
        );
        warn!(asn = %asn, vlan_id = %vlan.vlan_id_display(), "VLAN entry without addresses");
        parsed.errors.push(message);
        return None;
    }

    let mut failed = false;
    let ipv4 = ipv4_raw.as_deref().and_then(|raw| {
        let ip = raw.parse::<Ipv4Addr>().ok();
        if ip.is_none() {
            record_invalid_ip(parsed, raw, vlan);
            failed = true;
        }
        ip
    });
    let ipv6 = ipv6_raw.as_deref().and_then(|raw| {
        let ip = raw.parse::<Ipv6Addr>().ok();
        if ip.is_none() {
            record_invalid_ip(parsed, raw, vlan);
            failed = true;
        }
        ip
    });

    if failed {
        return None;
    }
    Some(IxfId::new(asn, ipv4, ipv6))
}

fn address_string(address: Option<&VlanAddress>) -> Option<String> {
    match address?.address.as_ref()? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Null => None,
        Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

fn record_invalid_ip(parsed: &mut ParsedFeed, raw: &str, vlan: &VlanEntry) {
    let err = IxfError::invalid_ip(raw, vlan.vlan_id_display());
    warn!(address = raw, "Invalid ip address in member list");
    parsed.errors.push(err.to_string());
    parsed.invalid_ips.push(err.to_string());
}

/// Sums the interface speeds of a connection. Values that do not parse
/// count as 0 and are returned as errors.
pub fn parse_speed(connection: &Connection) -> (u64, Vec<String>) {
    let mut speed = 0u64;
    let mut errors = Vec::new();

    for interface in &connection.if_list {
        let parsed = match &interface.if_speed {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            Some(_) => None,
        };
        match parsed {
            Some(value) => speed = speed.saturating_add(value),
            None => {
                let shown = match &interface.if_speed {
                    Some(Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                warn!(value = %shown, "Invalid speed value");
                errors.push(IxfError::invalid_speed(shown).to_string());
            }
        }
    }

    (speed, errors)
}
