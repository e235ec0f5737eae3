//! Keyed store of live proposed changes.
//!
//! Proposals are indexed by `(ixlan, asn, ipv4, ipv6)`. `upsert` is the only
//! way in, so an identity can never hold two live proposals. Dismissal is a
//! flag on the proposal; only [`ProposalStore::resolve`] removes one.

use crate::proposal::{Action, ProposalDraft, ProposalKey, ProposedChange};
use chrono::{DateTime, Duration, Utc};
use ixf_common::{IxfError, IxfResult, TicketRef};
use ixf_types::{Asn, ExchangeId, IxLanId, ProposalId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What an upsert did to the stored proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Action, proposed fields or error differ from the stored proposal.
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: ProposalId,
    pub outcome: UpsertOutcome,
    pub dismissed: bool,
}

impl Upserted {
    /// New or changed and not dismissed.
    pub fn should_notify(&self) -> bool {
        self.outcome != UpsertOutcome::Unchanged && !self.dismissed
    }
}

/// What a network is shown of its proposals.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkProposals<'a> {
    pub asn: Asn,
    pub exchanges: BTreeMap<ExchangeId, Vec<&'a ProposedChange>>,
    pub dismissed: Vec<&'a ProposedChange>,
    pub has_dismissed_actionable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    proposals: Vec<ProposedChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "StoreSnapshot", into = "StoreSnapshot")]
pub struct ProposalStore {
    next_id: u64,
    proposals: BTreeMap<ProposalId, ProposedChange>,
    index: HashMap<ProposalKey, ProposalId>,
}

impl From<StoreSnapshot> for ProposalStore {
    fn from(snapshot: StoreSnapshot) -> Self {
        let mut store = ProposalStore {
            next_id: snapshot.next_id,
            ..Default::default()
        };
        for proposal in snapshot.proposals {
            store.next_id = store.next_id.max(proposal.id.value());
            // a duplicated key in a hand edited state file keeps the first
            if store.index.contains_key(&proposal.key) {
                continue;
            }
            store.index.insert(proposal.key, proposal.id);
            store.proposals.insert(proposal.id, proposal);
        }
        store
    }
}

impl From<ProposalStore> for StoreSnapshot {
    fn from(store: ProposalStore) -> Self {
        StoreSnapshot {
            next_id: store.next_id,
            proposals: store.proposals.into_values().collect(),
        }
    }
}

impl ProposalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProposedChange> {
        self.proposals.values()
    }

    pub fn get(&self, id: ProposalId) -> Option<&ProposedChange> {
        self.proposals.get(&id)
    }

    pub fn find(&self, key: &ProposalKey) -> Option<&ProposedChange> {
        self.index.get(key).and_then(|id| self.proposals.get(id))
    }

    pub fn for_lan(&self, ixlan_id: IxLanId) -> impl Iterator<Item = &ProposedChange> {
        self.proposals
            .values()
            .filter(move |p| p.key.ixlan_id == ixlan_id)
    }

    pub fn for_asn(&self, asn: Asn) -> impl Iterator<Item = &ProposedChange> {
        self.proposals
            .values()
            .filter(move |p| p.key.ixf_id.asn == asn)
    }

    /// Live, actionable, non-dismissed proposals of a network, grouped by
    /// the exchange `exchange_of` maps each LAN to.
    pub fn for_network(
        &self,
        asn: Asn,
        exchange_of: impl Fn(IxLanId) -> Option<ExchangeId>,
    ) -> BTreeMap<ExchangeId, Vec<&ProposedChange>> {
        let mut grouped: BTreeMap<ExchangeId, Vec<&ProposedChange>> = BTreeMap::new();
        for proposal in self.for_asn(asn).filter(|p| {
            !p.dismissed && !p.is_requirement() && p.action != Action::Noop && p.actionable_for_network()
        }) {
            if let Some(exchange) = exchange_of(proposal.key.ixlan_id) {
                grouped.entry(exchange).or_default().push(proposal);
            }
        }
        grouped
    }

    pub fn dismissed_for_network(&self, asn: Asn) -> impl Iterator<Item = &ProposedChange> {
        self.for_asn(asn).filter(|p| p.dismissed)
    }

    /// Whether the network dismissed something it could act on.
    pub fn network_has_dismissed_actionable(&self, asn: Asn) -> bool {
        self.dismissed_for_network(asn)
            .any(|p| p.action != Action::Noop && p.actionable_for_network())
    }

    pub fn network_view(
        &self,
        asn: Asn,
        exchange_of: impl Fn(IxLanId) -> Option<ExchangeId>,
    ) -> NetworkProposals<'_> {
        NetworkProposals {
            asn,
            exchanges: self.for_network(asn, exchange_of),
            dismissed: self.dismissed_for_network(asn).collect(),
            has_dismissed_actionable: self.network_has_dismissed_actionable(asn),
        }
    }

    /// Creates the proposal for `key` or refreshes the existing one.
    pub fn upsert(&mut self, key: ProposalKey, draft: ProposalDraft, now: DateTime<Utc>) -> Upserted {
        if let Some(existing) = self
            .index
            .get(&key)
            .and_then(|id| self.proposals.get_mut(id))
        {
            let changed = existing.action != draft.action
                || existing.fields != draft.fields
                || existing.error != draft.error;

            existing.data = draft.data;
            existing.reason = draft.reason;
            existing.requirement_of = draft.requirement_of;

            if changed {
                existing.action = draft.action;
                existing.fields = draft.fields;
                existing.error = draft.error;
                existing.updated_at = now;
            }

            return Upserted {
                id: existing.id,
                outcome: if changed {
                    UpsertOutcome::Changed
                } else {
                    UpsertOutcome::Unchanged
                },
                dismissed: existing.dismissed,
            };
        }

        self.next_id += 1;
        let id = ProposalId::new(self.next_id);
        self.index.insert(key, id);
        self.proposals.insert(
            id,
            ProposedChange {
                id,
                key,
                action: draft.action,
                fields: draft.fields,
                data: draft.data,
                reason: draft.reason,
                error: draft.error,
                dismissed: false,
                requirement_of: draft.requirement_of,
                ticket: None,
                created_at: now,
                updated_at: now,
                resolved: false,
            },
        );

        Upserted {
            id,
            outcome: UpsertOutcome::Created,
            dismissed: false,
        }
    }

    /// Removes the proposal for `key` together with the proposals folded
    /// into it. A proposal that is itself folded into another is left alone.
    /// Returns the removed proposals, parent first, marked resolved.
    pub fn resolve(&mut self, key: &ProposalKey) -> Vec<ProposedChange> {
        let Some(id) = self.index.get(key).copied() else {
            return Vec::new();
        };
        if self
            .proposals
            .get(&id)
            .is_some_and(ProposedChange::is_requirement)
        {
            return Vec::new();
        }

        let children: Vec<ProposalId> = self
            .proposals
            .values()
            .filter(|p| p.requirement_of == Some(id))
            .map(|p| p.id)
            .collect();

        std::iter::once(id)
            .chain(children)
            .filter_map(|id| self.remove(id))
            .map(|mut p| {
                p.resolved = true;
                p
            })
            .collect()
    }

    fn remove(&mut self, id: ProposalId) -> Option<ProposedChange> {
        let proposal = self.proposals.remove(&id)?;
        self.index.remove(&proposal.key);
        Some(proposal)
    }

    /// Marks the proposal for `key` as dismissed.
    pub fn dismiss(&mut self, key: &ProposalKey) -> IxfResult<ProposalId> {
        let id = self
            .index
            .get(key)
            .copied()
            .ok_or_else(|| IxfError::not_found("proposal", key))?;
        if let Some(proposal) = self.proposals.get_mut(&id) {
            proposal.dismissed = true;
        }
        Ok(id)
    }

    pub fn set_ticket(&mut self, id: ProposalId, ticket: TicketRef) {
        if let Some(proposal) = self.proposals.get_mut(&id) {
            proposal.ticket = Some(ticket);
        }
    }

    /// Proposals older than `after` that still need a ticket: not
    /// dismissed, not folded into another, not a no-op, no ticket yet.
    pub fn aged(&self, now: DateTime<Utc>, after: Duration) -> Vec<ProposalId> {
        let cutoff = now - after;
        self.proposals
            .values()
            .filter(|p| {
                !p.dismissed
                    && !p.is_requirement()
                    && p.action != Action::Noop
                    && p.ticket.is_none()
                    && p.created_at <= cutoff
            })
            .map(|p| p.id)
            .collect()
    }

    /// Drops every proposal.
    pub fn clear(&mut self) -> usize {
        let count = self.proposals.len();
        self.proposals.clear();
        self.index.clear();
        count
    }

    pub fn reset_dismissals(&mut self) -> usize {
        let mut count = 0;
        for proposal in self.proposals.values_mut().filter(|p| p.dismissed) {
            proposal.dismissed = false;
            count += 1;
        }
        count
    }

    pub fn reset_tickets(&mut self) -> usize {
        let mut count = 0;
        for proposal in self.proposals.values_mut() {
            if proposal.ticket.take().is_some() {
                count += 1;
            }
        }
        count
    }
}
