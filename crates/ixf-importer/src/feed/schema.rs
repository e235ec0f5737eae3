//! Serde model of the IX-F member list (schema versions 0.4 to 1.0).
//!
//! Only the fields the importer reads are modelled; everything else is
//! ignored. Lists that exchanges publish as `null` deserialize as empty.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemberEntry {
    #[serde(default)]
    pub asnum: Value,
    #[serde(default)]
    pub member_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub connection_list: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub if_list: Vec<Interface>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub vlan_list: Vec<VlanEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Interface {
    #[serde(default)]
    pub if_speed: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VlanEntry {
    #[serde(default)]
    pub vlan_id: Option<Value>,
    #[serde(default)]
    pub ipv4: Option<VlanAddress>,
    #[serde(default)]
    pub ipv6: Option<VlanAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VlanAddress {
    #[serde(default)]
    pub address: Option<Value>,
    #[serde(default)]
    pub routeserver: Option<bool>,
}

impl VlanEntry {
    /// The VLAN id as published, for messages.
    pub fn vlan_id_display(&self) -> String {
        match &self.vlan_id {
            Some(Value::String(s)) => s.clone(),
            Some(v) if !v.is_null() => v.to_string(),
            _ => "None".to_string(),
        }
    }

    pub fn vlan_id(&self) -> Option<u64> {
        self.vlan_id.as_ref().and_then(Value::as_u64)
    }
}
