//! Append-only session history.
//!
//! Every write to a session records a full snapshot. Import logs refer to
//! these versions, and rollback restores from them.

use super::model::Session;
use chrono::{DateTime, Utc};
use ixf_types::{SessionId, VersionId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub session_id: SessionId,
    pub snapshot: Session,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Set on versions written by a rollback: the version that was undone.
    #[serde(default)]
    pub rollback_of: Option<VersionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStore {
    next_id: u64,
    versions: Vec<Version>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a snapshot of `session` and returns the new version id.
    pub fn record(
        &mut self,
        session: &Session,
        comment: Option<String>,
        rollback_of: Option<VersionId>,
        now: DateTime<Utc>,
    ) -> VersionId {
        self.next_id += 1;
        let id = VersionId::new(self.next_id);
        self.versions.push(Version {
            id,
            session_id: session.id,
            snapshot: session.clone(),
            created_at: now,
            comment,
            rollback_of,
        });
        id
    }

    pub fn get(&self, id: VersionId) -> Option<&Version> {
        self.versions.iter().find(|v| v.id == id)
    }

    /// Versions of one session, oldest first.
    pub fn versions_for(&self, session_id: SessionId) -> impl Iterator<Item = &Version> {
        self.versions
            .iter()
            .filter(move |v| v.session_id == session_id)
    }

    pub fn latest_for(&self, session_id: SessionId) -> Option<&Version> {
        self.versions_for(session_id).last()
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
