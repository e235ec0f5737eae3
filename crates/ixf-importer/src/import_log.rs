//! Audit trail of applied changes and their rollback.
//!
//! Every committed run that wrote at least one session leaves one
//! [`ImportLog`]. Entries point at the session version before and after the
//! write. Rolling a log back restores the before versions, newest entry
//! first, and is all-or-nothing.

use crate::registry::{Registry, Session, SessionStatus};
use chrono::{DateTime, Utc};
use ixf_common::{IxfError, IxfResult};
use ixf_types::{ImportLogId, IxLanId, SessionId, VersionId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogEntry {
    pub session_id: SessionId,
    /// `add`, `modify` or `delete`.
    pub action: String,
    pub reason: String,
    /// Absent when the run created the session.
    #[serde(default)]
    pub version_before: Option<VersionId>,
    pub version_after: VersionId,
}

/// Old and new value of one session field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: Value,
    pub to: Value,
}

impl ImportLogEntry {
    /// Fields that differ between the before and after versions. Empty for
    /// creations.
    pub fn changes(&self, registry: &Registry) -> BTreeMap<String, FieldChange> {
        let versions = registry.versions();
        let (Some(before), Some(after)) = (
            self.version_before.and_then(|v| versions.get(v)),
            versions.get(self.version_after),
        ) else {
            return BTreeMap::new();
        };

        let mut changes = BTreeMap::new();
        for (field, from, to) in compared_fields(&before.snapshot, &after.snapshot) {
            if from != to {
                changes.insert(field.to_string(), FieldChange { from, to });
            }
        }
        changes
    }
}

fn compared_fields(before: &Session, after: &Session) -> [(&'static str, Value, Value); 6] {
    [
        ("ipaddr4", json!(before.ipv4), json!(after.ipv4)),
        ("ipaddr6", json!(before.ipv6), json!(after.ipv6)),
        ("speed", json!(before.speed), json!(after.speed)),
        ("operational", json!(before.operational), json!(after.operational)),
        ("is_rs_peer", json!(before.is_rs_peer), json!(after.is_rs_peer)),
        (
            "status",
            json!(before.status.to_string()),
            json!(after.status.to_string()),
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLog {
    pub id: ImportLogId,
    pub ixlan_id: IxLanId,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<ImportLogEntry>,
}

/// Whether one entry can still be reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStatus {
    CanRollback,
    /// The session was written again after this entry.
    ChangedSince,
    /// An address the entry would restore is held by another active session.
    ConflictElsewhere,
    AlreadyRolledBack,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RollbackStatus::CanRollback => "can-rollback",
            RollbackStatus::ChangedSince => "changed-since",
            RollbackStatus::ConflictElsewhere => "conflict-elsewhere",
            RollbackStatus::AlreadyRolledBack => "already-rolled-back",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportLogBook {
    next_id: u64,
    logs: Vec<ImportLog>,
}

impl ImportLogBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archives the entries of one run.
    pub fn append(
        &mut self,
        ixlan_id: IxLanId,
        entries: Vec<ImportLogEntry>,
        now: DateTime<Utc>,
    ) -> ImportLogId {
        self.next_id += 1;
        let id = ImportLogId::new(self.next_id);
        self.logs.push(ImportLog {
            id,
            ixlan_id,
            created_at: now,
            entries,
        });
        id
    }

    pub fn get(&self, id: ImportLogId) -> Option<&ImportLog> {
        self.logs.iter().find(|log| log.id == id)
    }

    /// Logs in creation order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ImportLog> {
        self.logs.iter()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

/// Rollback status of one entry against the current registry state.
pub fn rollback_status(registry: &Registry, entry: &ImportLogEntry) -> RollbackStatus {
    let versions = registry.versions();
    let Some(latest) = versions.latest_for(entry.session_id) else {
        return RollbackStatus::ChangedSince;
    };

    if latest.rollback_of == Some(entry.version_after) {
        return RollbackStatus::AlreadyRolledBack;
    }
    if latest.id != entry.version_after {
        return RollbackStatus::ChangedSince;
    }

    let restored = entry
        .version_before
        .and_then(|v| versions.get(v))
        .map(|v| &v.snapshot)
        .filter(|s| s.status == SessionStatus::Active);

    if let Some(restored) = restored {
        let held_elsewhere = registry
            .sessions()
            .filter(|s| s.is_active() && s.id != restored.id)
            .any(|s| s.addresses().any(|a| restored.addresses().any(|r| r == a)));
        if held_elsewhere {
            return RollbackStatus::ConflictElsewhere;
        }
    }

    RollbackStatus::CanRollback
}

/// Statuses of every entry of a log, in entry order.
pub fn log_status(registry: &Registry, log_id: ImportLogId) -> IxfResult<Vec<RollbackStatus>> {
    let log = registry
        .import_logs()
        .get(log_id)
        .ok_or_else(|| IxfError::not_found("import log", log_id))?;
    Ok(log
        .entries
        .iter()
        .map(|entry| rollback_status(registry, entry))
        .collect())
}

/// Reverts every entry of a log, newest first. Each entry is checked right
/// before it is reverted, so a later entry of the same run releasing an
/// address does not block an earlier one. If any entry cannot be reverted
/// the registry is left untouched.
#[instrument(skip(registry))]
pub fn rollback(
    registry: &mut Registry,
    log_id: ImportLogId,
    now: DateTime<Utc>,
) -> IxfResult<Vec<VersionId>> {
    let log = registry
        .import_logs()
        .get(log_id)
        .cloned()
        .ok_or_else(|| IxfError::not_found("import log", log_id))?;

    registry.transaction(|registry| {
        let mut written = Vec::with_capacity(log.entries.len());
        for entry in log.entries.iter().rev() {
            let status = rollback_status(registry, entry);
            if status != RollbackStatus::CanRollback {
                warn!(log = %log_id, session = %entry.session_id, %status, "Rollback refused");
                return Err(IxfError::RollbackRefused {
                    log: log_id.value(),
                    reason: format!("session {} is {}", entry.session_id, status),
                });
            }

            let reverted = match entry.version_before {
                Some(before) => registry
                    .versions()
                    .get(before)
                    .map(|v| v.snapshot.clone())
                    .ok_or_else(|| IxfError::not_found("version", before))?,
                None => {
                    let mut session = registry
                        .session(entry.session_id)
                        .cloned()
                        .ok_or_else(|| IxfError::not_found("session", entry.session_id))?;
                    session.status = SessionStatus::Deleted;
                    session.ipv4 = None;
                    session.ipv6 = None;
                    session
                }
            };

            written.push(registry.write_session(
                reverted,
                format!("rollback of import log {}", log_id),
                Some(entry.version_after),
                now,
            ));
        }
        info!(log = %log_id, entries = written.len(), "Import log rolled back");
        Ok(written)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Exchange, IxLan, LanPrefix};
    use ixf_types::{Asn, ExchangeId};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_exchange(Exchange::new(ExchangeId::new(1), "Example IX"));
        let mut lan = IxLan::new(IxLanId::new(1), ExchangeId::new(1));
        lan.prefixes.push(LanPrefix {
            prefix: "192.0.2.0/24".parse().unwrap(),
            active: true,
        });
        registry.add_ixlan(lan);
        registry
    }

    fn seed(registry: &mut Registry, last_octet: u8) -> SessionId {
        registry.add_session(
            IxLanId::new(1),
            Asn::new(64500).unwrap(),
            Some(std::net::Ipv4Addr::new(192, 0, 2, last_octet)),
            None,
            1000,
            false,
            now(),
        )
    }

    /// Writes `f` as an import and logs it.
    fn logged_update(
        registry: &mut Registry,
        id: SessionId,
        f: impl FnOnce(&mut Session),
    ) -> ImportLogId {
        let before = registry.versions().latest_for(id).map(|v| v.id);
        let after = registry.update_session(id, "ixf", now(), f).unwrap();
        let entry = ImportLogEntry {
            session_id: id,
            action: "modify".to_string(),
            reason: "test".to_string(),
            version_before: before,
            version_after: after,
        };
        registry
            .import_logs_mut()
            .append(IxLanId::new(1), vec![entry], now())
    }

    #[test]
    fn test_changes_lists_differing_fields() {
        let mut registry = registry();
        let id = seed(&mut registry, 1);
        let log = logged_update(&mut registry, id, |s| s.speed = 10000);
        let entry = registry.import_logs().get(log).unwrap().entries[0].clone();

        let changes = entry.changes(&registry);
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["speed"]);
        assert_eq!(changes["speed"].from, json!(1000));
        assert_eq!(changes["speed"].to, json!(10000));
    }

    #[test]
    fn test_rollback_restores_and_is_not_repeatable() {
        let mut registry = registry();
        let id = seed(&mut registry, 1);
        let log = logged_update(&mut registry, id, |s| s.speed = 10000);

        assert_eq!(
            log_status(&registry, log).unwrap(),
            vec![RollbackStatus::CanRollback]
        );
        rollback(&mut registry, log, now()).unwrap();
        assert_eq!(registry.session(id).unwrap().speed, 1000);
        assert_eq!(
            log_status(&registry, log).unwrap(),
            vec![RollbackStatus::AlreadyRolledBack]
        );
        assert!(rollback(&mut registry, log, now()).is_err());
    }

    #[test]
    fn test_changed_since_blocks_rollback() {
        let mut registry = registry();
        let id = seed(&mut registry, 1);
        let log = logged_update(&mut registry, id, |s| s.speed = 10000);
        registry
            .update_session(id, "manual", now(), |s| s.speed = 20000)
            .unwrap();

        assert_eq!(
            log_status(&registry, log).unwrap(),
            vec![RollbackStatus::ChangedSince]
        );
        let err = rollback(&mut registry, log, now()).unwrap_err();
        assert_eq!(err.kind(), "rollback-refused");
        assert_eq!(registry.session(id).unwrap().speed, 20000);
    }

    #[test]
    fn test_conflict_elsewhere() {
        let mut registry = registry();
        let id = seed(&mut registry, 1);
        let before = registry.versions().latest_for(id).map(|v| v.id);
        let after = registry.delete_session(id, "ixf", now()).unwrap();
        let log = registry.import_logs_mut().append(
            IxLanId::new(1),
            vec![ImportLogEntry {
                session_id: id,
                action: "delete".to_string(),
                reason: "gone".to_string(),
                version_before: before,
                version_after: after,
            }],
            now(),
        );
        seed(&mut registry, 1);

        assert_eq!(
            log_status(&registry, log).unwrap(),
            vec![RollbackStatus::ConflictElsewhere]
        );
    }

    #[test]
    fn test_rollback_of_creation_clears_addresses() {
        let mut registry = registry();
        let id = seed(&mut registry, 1);
        let after = registry.versions().latest_for(id).unwrap().id;
        let log = registry.import_logs_mut().append(
            IxLanId::new(1),
            vec![ImportLogEntry {
                session_id: id,
                action: "add".to_string(),
                reason: "new".to_string(),
                version_before: None,
                version_after: after,
            }],
            now(),
        );

        rollback(&mut registry, log, now()).unwrap();
        let session = registry.session(id).unwrap();
        assert_eq!(session.status, SessionStatus::Deleted);
        assert_eq!(session.ipv4, None);
    }
}
