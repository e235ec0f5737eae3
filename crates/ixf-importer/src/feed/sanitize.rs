//! Repairs known member list quirks before parsing.
//!
//! Some exchanges publish one logical VLAN as two entries, one carrying only
//! the IPv4 address and one carrying only the IPv6 address, sometimes even
//! spread over two connections. Those are merged back into dual-stack
//! entries here. The sanitizer also rejects documents that cannot be
//! reconciled safely: no member list, no VLAN entries at all, or one address
//! assigned to several connections.

use serde_json::{Map, Value};
use std::collections::HashSet;

pub const NO_MEMBER_LIST: &str = "No member_list found in IX-F data";
pub const NO_VLAN_ENTRIES: &str = "No entries in any of the vlan_list lists, aborting.";

/// Result of [`sanitize`]. `error` is set when the document must not be
/// imported.
#[derive(Debug, Clone, PartialEq)]
pub struct Sanitized {
    pub data: Value,
    pub error: Option<String>,
}

impl Sanitized {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub fn sanitize(mut raw: Value) -> Sanitized {
    let members = match raw.get_mut("member_list").and_then(Value::as_array_mut) {
        Some(members) => std::mem::take(members),
        None => {
            return Sanitized {
                data: raw,
                error: Some(NO_MEMBER_LIST.to_string()),
            }
        }
    };

    // identical member entries are published by some exchanges
    let mut unique = HashSet::new();
    let mut member_list: Vec<Value> = members
        .into_iter()
        .filter(|member| unique.insert(member.to_string()))
        .collect();

    let mut ipv4_addresses: HashSet<String> = HashSet::new();
    let mut ipv6_addresses: HashSet<String> = HashSet::new();
    let mut vlan_entries = 0usize;
    let mut error: Option<String> = None;

    for member in member_list.iter_mut() {
        let Some(connections) = member
            .get_mut("connection_list")
            .and_then(Value::as_array_mut)
        else {
            continue;
        };

        for connection in connections.iter_mut() {
            if let Some(obj) = connection.as_object_mut() {
                drop_null(obj, "vlan_list");
                drop_null(obj, "if_list");
            }
        }

        match_vlans_across_connections(connections);

        for connection in connections.iter_mut() {
            let Some(obj) = connection.as_object_mut() else {
                continue;
            };
            let vlans = match obj.remove("vlan_list") {
                Some(Value::Array(vlans)) => vlans,
                _ => Vec::new(),
            };
            let vlans = sanitize_vlans(vlans);
            vlan_entries += vlans.len();

            if error.is_none() {
                if let Some(first) = vlans.first() {
                    error = duplicate_address(first, "ipv4", &mut ipv4_addresses)
                        .or_else(|| duplicate_address(first, "ipv6", &mut ipv6_addresses));
                }
            }

            obj.insert("vlan_list".to_string(), Value::Array(vlans));
        }
    }

    if error.is_none() && !member_list.is_empty() && vlan_entries == 0 {
        error = Some(NO_VLAN_ENTRIES.to_string());
    }

    if let Some(obj) = raw.as_object_mut() {
        obj.insert("member_list".to_string(), Value::Array(member_list));
    }

    Sanitized { data: raw, error }
}

fn drop_null(obj: &mut Map<String, Value>, key: &str) {
    if matches!(obj.get(key), Some(Value::Null)) {
        obj.remove(key);
    }
}

/// Truthiness of an optional JSON value: null, false, and empty strings,
/// arrays or objects count as unset.
fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Number(_)) => true,
    }
}

fn vlan_id(vlan: &Value) -> Value {
    vlan.get("vlan_id").cloned().unwrap_or(Value::from(0))
}

fn duplicate_address(vlan: &Value, protocol: &str, seen: &mut HashSet<String>) -> Option<String> {
    let address = vlan.get(protocol)?.get("address")?.as_str()?;
    if address.is_empty() {
        return None;
    }
    if !seen.insert(address.to_string()) {
        return Some(format!(
            "Address {} assigned to more than one distinct connection",
            address
        ));
    }
    None
}

fn vlan_list(connection: &Value) -> &[Value] {
    connection
        .get("vlan_list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// VLAN entries carrying exactly one of the two protocols.
fn vlans_needing_pair(connection: &Value) -> Vec<Value> {
    vlan_list(connection)
        .iter()
        .filter(|vlan| is_set(vlan.get("ipv4")) != is_set(vlan.get("ipv6")))
        .cloned()
        .collect()
}

fn if_speed_list(connection: &Value) -> Vec<String> {
    let mut speeds: Vec<String> = connection
        .get("if_list")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|entry| entry.get("if_speed"))
                .filter(|speed| is_set(Some(speed)))
                .map(Value::to_string)
                .collect()
        })
        .unwrap_or_default();
    speeds.sort();
    speeds
}

fn connection_state(connection: &Value) -> Value {
    connection
        .get("state")
        .cloned()
        .unwrap_or_else(|| Value::from("undefined"))
}

fn connections_match(a: &Value, b: &Value) -> bool {
    connection_state(a) == connection_state(b) && if_speed_list(a) == if_speed_list(b)
}

/// Two entries match when they share a VLAN id and each fills in the
/// protocol the other is missing.
fn vlan_matches(a: &Value, b: &Value) -> bool {
    if vlan_id(a) != vlan_id(b) {
        return false;
    }
    if is_set(a.get("ipv4")) && is_set(b.get("ipv4")) {
        return false;
    }
    if is_set(a.get("ipv6")) && is_set(b.get("ipv6")) {
        return false;
    }
    true
}

/// Moves single-protocol VLAN entries published on a sibling connection
/// (same state, same interface speeds) next to their complement.
pub fn match_vlans_across_connections(connections: &mut [Value]) {
    for i in 0..connections.len() {
        if vlan_list(&connections[i]).is_empty() {
            continue;
        }

        let lone_vlans = vlans_needing_pair(&connections[i]);
        if lone_vlans.is_empty() {
            continue;
        }

        let (head, rest) = connections.split_at_mut(i + 1);
        let connection = &mut head[i];

        for lone in &lone_vlans {
            let found = rest
                .iter_mut()
                .filter(|other| connections_match(connection, other))
                .find_map(|other| {
                    let list = other.get_mut("vlan_list")?.as_array_mut()?;
                    let pos = list.iter().position(|vlan| vlan_matches(lone, vlan))?;
                    Some(list.remove(pos))
                });

            if let Some(vlan) = found {
                if let Some(list) = connection
                    .get_mut("vlan_list")
                    .and_then(Value::as_array_mut)
                {
                    list.push(vlan);
                }
            }
        }
    }
}

/// Merges entries of one connection that share a VLAN id into dual-stack
/// entries and drops entries without any address.
pub fn sanitize_vlans(vlans: Vec<Value>) -> Vec<Value> {
    let mut groups: Vec<(Value, Vec<Map<String, Value>>)> = Vec::new();

    for vlan in vlans {
        let Value::Object(mut vlan) = vlan else {
            continue;
        };

        for protocol in ["ipv4", "ipv6"] {
            if vlan.contains_key(protocol) && !is_set(vlan.get(protocol)) {
                vlan.remove(protocol);
            }
        }

        if !vlan.contains_key("ipv4") && !vlan.contains_key("ipv6") {
            continue;
        }

        let id = vlan.get("vlan_id").cloned().unwrap_or(Value::from(0));

        let Some(idx) = groups.iter().position(|(gid, _)| *gid == id) else {
            groups.push((id, vec![vlan]));
            continue;
        };

        let entries = &mut groups[idx].1;
        if entries.is_empty() {
            entries.push(vlan);
            continue;
        }
        let last = entries.len() - 1;
        let current = &mut entries[last];

        let fill = if vlan.contains_key("ipv4") && !current.contains_key("ipv4") {
            Some("ipv4")
        } else if vlan.contains_key("ipv6") && !current.contains_key("ipv6") {
            Some("ipv6")
        } else {
            None
        };

        match fill.and_then(|protocol| Some((protocol, vlan.get(protocol)?.clone()))) {
            Some((protocol, value)) => {
                current.insert(protocol.to_string(), value);
            }
            None => groups[idx].1.push(vlan),
        }
    }

    groups
        .into_iter()
        .flat_map(|(_, entries)| entries.into_iter().map(Value::Object))
        .collect()
}
