//! Read-only history of what imports did to one network.

use crate::import_log::FieldChange;
use crate::registry::Registry;
use ixf_common::{ImporterConfig, IxfResult, IxfError};
use ixf_types::{Asn, ExchangeId, IxLanId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostMortemEntry {
    pub ix_id: ExchangeId,
    pub ix_name: String,
    pub ixlan_id: IxLanId,
    pub changes: BTreeMap<String, FieldChange>,
    pub reason: String,
    pub action: String,
    pub asn: Asn,
    pub ipaddr4: Option<Ipv4Addr>,
    pub ipaddr6: Option<Ipv6Addr>,
    pub speed: u64,
    pub is_rs_peer: bool,
    pub created: String,
}

pub struct PostMortem<'a> {
    config: &'a ImporterConfig,
}

impl<'a> PostMortem<'a> {
    pub fn new(config: &'a ImporterConfig) -> Self {
        PostMortem { config }
    }

    /// Import log entries touching sessions of `asn`, newest first, at most
    /// `limit` of them and never more than the configured cap.
    pub fn generate(&self, registry: &Registry, asn: Asn, limit: usize) -> IxfResult<Vec<PostMortemEntry>> {
        if limit == 0 {
            return Err(IxfError::invalid_config("limit", "must be greater than 0"));
        }
        let limit = limit.min(self.config.postmortem.limit);
        let versions = registry.versions();
        let mut report = Vec::new();

        for log in registry.import_logs().iter().rev() {
            let (ix_id, ix_name) = registry
                .exchange_of(log.ixlan_id)
                .map(|e| (e.id, e.name.clone()))
                .unwrap_or((ExchangeId::new(0), String::new()));

            for entry in log.entries.iter().rev() {
                let Some(after) = versions.get(entry.version_after) else {
                    continue;
                };
                let session = &after.snapshot;
                if session.asn != asn {
                    continue;
                }

                report.push(PostMortemEntry {
                    ix_id,
                    ix_name: ix_name.clone(),
                    ixlan_id: log.ixlan_id,
                    changes: entry.changes(registry),
                    reason: entry.reason.clone(),
                    action: entry.action.clone(),
                    asn,
                    ipaddr4: session.ipv4,
                    ipaddr6: session.ipv6,
                    speed: session.speed,
                    is_rs_peer: session.is_rs_peer,
                    created: log.created_at.format(TIMESTAMP_FORMAT).to_string(),
                });
                if report.len() >= limit {
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }
}
