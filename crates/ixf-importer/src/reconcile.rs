//! Reconciliation of one exchange LAN against its member list.
//!
//! A run works in two phases. Remote records that pass the business filters
//! are first classified against the local sessions into [`Diff`]s, and adds
//! are paired with the deletions they replace. Only then are changes
//! materialized: deletions first, then adds and modifications, each either
//! applied directly or kept as a proposal depending on the network's
//! `allow_ixp_update` flag. A cleanup pass resolves proposals the run made
//! obsolete.

use crate::feed::{parse, sanitize, RemoteRecord};
use crate::import_log::ImportLogEntry;
use crate::notify::Notification;
use crate::proposal::{
    Action, ProposalDraft, ProposalKey, ProposedFields, REASON_ENTRY_GONE_FROM_REMOTE,
    REASON_NEW_ENTRY, REASON_VALUES_CHANGED,
};
use crate::registry::{Exchange, FieldErrors, ImportAttempt, IxLan, Registry, Session, SessionStatus};
use crate::run_log::{PeerInfo, RunLog, RunLogEntry};
use crate::store::Upserted;
use chrono::{DateTime, Utc};
use ixf_common::{EntityStatus, ImporterConfig, IxfError, IxfResult, Network, NetworkDirectory};
use ixf_types::{Asn, ImportLogId, IpProtocol, IxLanId, IxfId, ProposalId, SessionId, VersionId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

const SOURCE: &str = "IX-F import";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Persist the run. Without it the run is a preview against a copy.
    pub commit: bool,
    /// Only reconcile records and sessions of this network.
    pub asn: Option<Asn>,
}

#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub ixlan_id: IxLanId,
    /// False when the feed or the LAN could not be processed.
    pub success: bool,
    pub log: RunLog,
    /// Set when the run applied at least one change.
    pub import_log: Option<ImportLogId>,
    /// Queued for the notifier. Always empty for previews.
    pub notifications: Vec<Notification>,
}

/// Classification of one remote record or local session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff {
    /// No active session with the identity. `reactivate` names a soft
    /// deleted session with exactly that identity.
    Add {
        candidate: usize,
        reactivate: Option<SessionId>,
    },
    Modify {
        candidate: usize,
        session: SessionId,
        fields: Vec<&'static str>,
    },
    Noop {
        candidate: usize,
        session: SessionId,
    },
    /// Active session missing from the feed.
    Delete { session: SessionId },
}

/// Adds paired with the deletions they replace.
#[derive(Debug, Default)]
struct Pairing {
    parent: HashMap<SessionId, usize>,
    children: BTreeMap<usize, Vec<SessionId>>,
}

/// Remote record that passed the business filters.
#[derive(Debug, Clone)]
struct Candidate {
    record: RemoteRecord,
    /// Identity restricted to the protocols the network supports.
    ixf_id: IxfId,
    network: Network,
}

impl Candidate {
    fn fields(&self) -> ProposedFields {
        ProposedFields {
            speed: self.record.speed,
            operational: self.record.operational,
            is_rs_peer: self.record.is_rs_peer,
        }
    }
}

fn session_fields(session: &Session) -> ProposedFields {
    ProposedFields {
        speed: session.speed,
        operational: session.operational,
        is_rs_peer: Some(session.is_rs_peer),
    }
}

pub struct Reconciler<'a> {
    config: &'a ImporterConfig,
    now: DateTime<Utc>,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ImporterConfig, now: DateTime<Utc>) -> Self {
        Reconciler { config, now }
    }

    /// Reconciles one LAN with the fetched member list.
    ///
    /// `feed` is the fetch result; a fetch error is handled like a broken
    /// feed. Errors returned from here are system level.
    #[instrument(skip(self, registry, feed), fields(commit = options.commit))]
    pub fn update(
        &self,
        registry: &mut Registry,
        ixlan_id: IxLanId,
        feed: IxfResult<Value>,
        options: UpdateOptions,
    ) -> IxfResult<ImportOutcome> {
        if options.commit {
            return self.run(registry, ixlan_id, feed, options);
        }

        let mut scratch = registry.clone();
        let mut outcome = self.run(&mut scratch, ixlan_id, feed, options)?;
        outcome.notifications.clear();
        outcome.import_log = None;
        Ok(outcome)
    }

    fn run(
        &self,
        registry: &mut Registry,
        ixlan_id: IxLanId,
        feed: IxfResult<Value>,
        options: UpdateOptions,
    ) -> IxfResult<ImportOutcome> {
        let ixlan = registry
            .ixlan(ixlan_id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("ixlan", ixlan_id))?;
        let exchange = registry
            .exchange(ixlan.exchange_id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("exchange", ixlan.exchange_id))?;

        LanRun {
            config: self.config,
            now: self.now,
            options,
            registry,
            ixlan,
            exchange,
            log: RunLog::new(),
            notifications: Vec::new(),
            entries: Vec::new(),
            touched: HashSet::new(),
            protocol_conflict: None,
        }
        .execute(feed)
    }
}

/// State of one run over one LAN.
struct LanRun<'r> {
    config: &'r ImporterConfig,
    now: DateTime<Utc>,
    options: UpdateOptions,
    registry: &'r mut Registry,
    ixlan: IxLan,
    exchange: Exchange,
    log: RunLog,
    notifications: Vec<Notification>,
    entries: Vec<ImportLogEntry>,
    /// Proposal keys upserted or resolved by this run.
    touched: HashSet<ProposalKey>,
    /// First protocol conflict seen by `filter`, reported once it succeeds.
    protocol_conflict: Option<(IpProtocol, IxfId)>,
}

impl LanRun<'_> {
    fn execute(mut self, feed: IxfResult<Value>) -> IxfResult<ImportOutcome> {
        let sanitized = feed.and_then(|raw| {
            let sanitized = sanitize(raw);
            match sanitized.error {
                Some(error) => Err(IxfError::feed_invalid(error)),
                None => Ok(sanitized.data),
            }
        });
        let data = match sanitized {
            Ok(data) => data,
            Err(err) => return self.fail_feed(err),
        };

        if self.ixlan.active_prefixes().next().is_none() {
            let err = IxfError::NoActivePrefixes {
                ixlan: self.ixlan.id.value(),
            };
            warn!(ixlan = %self.ixlan.id, "{}", err);
            self.log.error(err.to_string());
            return self.finish(false);
        }

        let parsed = parse(&data);
        for error in parsed.errors {
            self.log.error(error);
        }
        for skipped in parsed.skipped {
            let peer = self.peer(skipped.asn);
            self.log.push(RunLogEntry {
                peer,
                action: "ignore".to_string(),
                reason: skipped.reason,
            });
        }

        let mut seen = parsed.seen;
        let candidates = match self.filter(parsed.records, &mut seen) {
            Ok(candidates) => candidates,
            Err(err) => return self.fail_feed(err),
        };
        self.report_protocol_conflict();

        if let Some(lan) = self.registry.ixlan_mut(self.ixlan.id) {
            lan.import_error = None;
            lan.import_error_notified = None;
        }

        let diffs = self.classify(&candidates, &seen);
        let pairing = self.pair(&diffs, &candidates);
        let blocked = self.blocked_pairs(&diffs, &pairing, &candidates)?;

        for diff in &diffs {
            if let Diff::Delete { session } = diff {
                match pairing.parent.get(session) {
                    // kept until the replacement can be written
                    Some(parent) if blocked.contains(parent) => {}
                    Some(_) => self.delete(*session, true)?,
                    None => self.delete(*session, false)?,
                }
            }
        }

        for diff in &diffs {
            match diff {
                Diff::Delete { .. } => {}
                Diff::Noop { candidate, session } => {
                    self.noop(&candidates[*candidate], *session)?;
                }
                Diff::Add {
                    candidate,
                    reactivate,
                } => {
                    let children = pairing
                        .children
                        .get(candidate)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    self.change(&candidates[*candidate], Action::Add, *reactivate, &[], children)?;
                }
                Diff::Modify {
                    candidate,
                    session,
                    fields,
                } => {
                    self.change(&candidates[*candidate], Action::Modify, Some(*session), fields, &[])?;
                }
            }
        }

        self.cleanup(&seen);

        if !parsed.invalid_ips.is_empty() {
            let message = format!(
                "The following IP addresses in the IX-F data could not be parsed:\n{}",
                parsed.invalid_ips.join("\n")
            );
            self.notifications
                .push(Notification::source_error(&self.exchange, self.ixlan.id, message));
        }

        let import_log = if self.entries.is_empty() {
            None
        } else {
            let entries = std::mem::take(&mut self.entries);
            Some(
                self.registry
                    .import_logs_mut()
                    .append(self.ixlan.id, entries, self.now),
            )
        };

        if let Some(exchange) = self.registry.exchange_mut(self.exchange.id) {
            exchange.last_import = Some(self.now);
            exchange.net_count = candidates.len();
        }
        info!(
            ixlan = %self.ixlan.id,
            records = candidates.len(),
            applied = import_log.is_some(),
            proposals = self.touched.len(),
            "IX-F import finished"
        );

        let mut outcome = self.finish(true)?;
        outcome.import_log = import_log;
        Ok(outcome)
    }

    /// Records a feed level failure and notifies the exchange, at most once
    /// per notification period.
    fn fail_feed(mut self, err: IxfError) -> IxfResult<ImportOutcome> {
        let message = err.to_string();
        warn!(ixlan = %self.ixlan.id, kind = err.kind(), error = %message, "IX-F feed rejected");
        self.log.error(message.clone());

        let period = self.config.error_notification_period();
        let now = self.now;
        let lan = self
            .registry
            .ixlan_mut(self.ixlan.id)
            .ok_or_else(|| IxfError::not_found("ixlan", self.ixlan.id))?;
        let due = lan
            .import_error_notified
            .map_or(true, |notified| now - notified > period);
        lan.import_error = Some(message.clone());
        if due {
            lan.import_error_notified = Some(now);
            self.notifications
                .push(Notification::source_error(&self.exchange, self.ixlan.id, message));
        } else {
            debug!(ixlan = %self.ixlan.id, "Feed error already notified recently");
        }

        self.finish(false)
    }

    fn finish(self, success: bool) -> IxfResult<ImportOutcome> {
        self.registry.set_attempt(ImportAttempt {
            ixlan_id: self.ixlan.id,
            fetched_at: self.now,
            log: self.log.clone(),
        });
        Ok(ImportOutcome {
            ixlan_id: self.ixlan.id,
            success,
            log: self.log,
            import_log: None,
            notifications: self.notifications,
        })
    }

    /// Applies the business filters. Fails when the surviving records use
    /// more than one VLAN.
    fn filter(
        &mut self,
        records: Vec<RemoteRecord>,
        seen: &mut HashSet<IxfId>,
    ) -> IxfResult<Vec<Candidate>> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut vlans = BTreeSet::new();

        for record in records {
            let asn = record.ixf_id.asn;
            if self.options.asn.is_some_and(|only| only != asn) {
                continue;
            }

            let Some(network) = self.registry.network(asn).cloned() else {
                self.ignore(&record, "Network does not exist in peeringdb");
                continue;
            };
            if network.status != EntityStatus::Ok {
                self.ignore(&record, format!("Network status is '{}'", network.status));
                continue;
            }

            if !record.ixf_id.addresses().any(|addr| self.ixlan.admits(&addr)) {
                debug!(identity = %record.ixf_id, "No address inside the LAN prefixes");
                continue;
            }

            let (v4, v6) = (network.ipv4_support(), network.ipv6_support());
            if record.ixf_id.ipv4.is_some() && !v4 {
                self.flag_protocol_conflict(IpProtocol::Ipv4, &record.ixf_id);
            } else if record.ixf_id.ipv6.is_some() && !v6 {
                self.flag_protocol_conflict(IpProtocol::Ipv6, &record.ixf_id);
            }

            let ixf_id = record.ixf_id.restrict(v4, v6);
            if ixf_id != record.ixf_id {
                seen.remove(&record.ixf_id);
                if !ixf_id.is_empty() {
                    seen.insert(ixf_id);
                }
            }
            if ixf_id.is_empty() {
                let err = IxfError::ProtocolsDisabled {
                    identity: record.ixf_id.to_string(),
                };
                warn!(identity = %record.ixf_id, "{}", err);
                self.log.error(format!("{}: {}", record.ixf_id, err));
                continue;
            }

            if candidates.iter().any(|c| c.ixf_id == ixf_id) {
                debug!(identity = %ixf_id, "Duplicate identity after protocol filtering");
                continue;
            }

            vlans.insert(record.vlan_id);
            candidates.push(Candidate {
                record,
                ixf_id,
                network,
            });
        }

        if vlans.len() > 1 {
            return Err(IxfError::MultipleVlans {
                ixlan: self.ixlan.id.value(),
            });
        }
        Ok(candidates)
    }

    fn flag_protocol_conflict(&mut self, protocol: IpProtocol, ixf_id: &IxfId) {
        if self.protocol_conflict.is_none() {
            self.protocol_conflict = Some((protocol, *ixf_id));
        }
    }

    /// Stores the conflict flag on the LAN and notifies the exchange when it
    /// is newly raised. A run without conflict clears the flag.
    fn report_protocol_conflict(&mut self) {
        let Some(lan) = self.registry.ixlan_mut(self.ixlan.id) else {
            return;
        };
        let Some((protocol, ixf_id)) = self.protocol_conflict else {
            lan.protocol_conflict = None;
            return;
        };
        if lan.protocol_conflict.is_some() {
            return;
        }
        lan.protocol_conflict = Some(protocol);
        warn!(ixlan = %self.ixlan.id, identity = %ixf_id, %protocol, "Protocol conflict");
        self.notifications.push(Notification::protocol_conflict(
            &self.exchange,
            self.ixlan.id,
            &ixf_id,
            protocol,
        ));
    }

    fn classify(&self, candidates: &[Candidate], seen: &HashSet<IxfId>) -> Vec<Diff> {
        let mut diffs: Vec<Diff> = self
            .registry
            .active_sessions_on(self.ixlan.id)
            .filter(|s| self.options.asn.map_or(true, |asn| s.asn == asn))
            .filter(|s| !seen.contains(&s.ixf_id()))
            .map(|s| Diff::Delete { session: s.id })
            .collect();

        for (candidate, c) in candidates.iter().enumerate() {
            let diff = match self.registry.find_session(self.ixlan.id, &c.ixf_id) {
                None => Diff::Add {
                    candidate,
                    reactivate: None,
                },
                Some(session) if !session.is_active() => Diff::Add {
                    candidate,
                    reactivate: Some(session.id),
                },
                Some(session) => {
                    let fields = self.changed_fields(session, &c.record);
                    if fields.is_empty() {
                        Diff::Noop {
                            candidate,
                            session: session.id,
                        }
                    } else {
                        Diff::Modify {
                            candidate,
                            session: session.id,
                            fields,
                        }
                    }
                }
            };
            diffs.push(diff);
        }

        diffs
    }

    fn changed_fields(&self, session: &Session, record: &RemoteRecord) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if session.operational != record.operational {
            fields.push("operational");
        }
        if self.config.reconcile.modify_speed && record.speed > 0 && session.speed != record.speed {
            fields.push("speed");
        }
        if self.config.reconcile.modify_is_rs_peer
            && record.is_rs_peer.is_some_and(|rs| rs != session.is_rs_peer)
        {
            fields.push("is_rs_peer");
        }
        fields
    }

    /// Pairs each add with the deletions of the same network whose address
    /// it now carries: at most one IPv4 and one IPv6 deletion per add, and
    /// a deletion belongs to the first add that claims it.
    fn pair(&self, diffs: &[Diff], candidates: &[Candidate]) -> Pairing {
        let mut pairing = Pairing::default();

        for diff in diffs {
            let Diff::Add { candidate, .. } = diff else {
                continue;
            };
            let raw = &candidates[*candidate].record.ixf_id;
            let (mut took_v4, mut took_v6) = (false, false);

            for deletion in diffs {
                let Diff::Delete { session } = deletion else {
                    continue;
                };
                if pairing.parent.contains_key(session) {
                    continue;
                }
                let Some(gone) = self.registry.session(*session) else {
                    continue;
                };
                if gone.asn != raw.asn {
                    continue;
                }

                let on_v4 = gone.ipv4.is_some() && gone.ipv4 == raw.ipv4;
                let on_v6 = gone.ipv6.is_some() && gone.ipv6 == raw.ipv6;
                if on_v4 && !took_v4 {
                    took_v4 = true;
                } else if on_v6 && !took_v6 {
                    took_v6 = true;
                } else {
                    continue;
                }

                pairing.parent.insert(*session, *candidate);
                pairing.children.entry(*candidate).or_default().push(*session);
            }
        }

        pairing
    }

    /// Adds of autonomous networks whose replacement would fail validation
    /// even with their paired deletions applied.
    fn blocked_pairs(
        &self,
        diffs: &[Diff],
        pairing: &Pairing,
        candidates: &[Candidate],
    ) -> IxfResult<HashSet<usize>> {
        let mut blocked = HashSet::new();
        for diff in diffs {
            let Diff::Add {
                candidate,
                reactivate,
            } = diff
            else {
                continue;
            };
            let Some(children) = pairing.children.get(candidate) else {
                continue;
            };
            let c = &candidates[*candidate];
            if !c.network.allow_ixp_update {
                continue;
            }
            let (_, errors) = self.replacement(c, *reactivate, children)?;
            if !errors.is_empty() {
                debug!(identity = %c.ixf_id, %errors, "Paired deletions held back");
                blocked.insert(*candidate);
            }
        }
        Ok(blocked)
    }

    /// The session the candidate would write and what fails on it.
    fn replacement(
        &self,
        candidate: &Candidate,
        existing: Option<SessionId>,
        released: &[SessionId],
    ) -> IxfResult<(Session, FieldErrors)> {
        let proposed = self.build_session(candidate, existing)?;
        let mut errors = match self.registry.validate_replacement(
            &proposed,
            released,
            &self.config.data_quality,
        ) {
            Ok(()) => FieldErrors::new(),
            Err(errors) => errors,
        };
        if candidate.record.speed == 0 && !candidate.record.speed_errors.is_empty() {
            errors.add("speed", candidate.record.speed_errors.join(", "));
        }
        Ok((proposed, errors))
    }

    fn pair_reason(&self, candidate: &Candidate, children: &[SessionId]) -> String {
        let gone: Vec<&Session> = children
            .iter()
            .filter_map(|id| self.registry.session(*id))
            .collect();
        let Some(first) = gone.first() else {
            return REASON_NEW_ENTRY.to_string();
        };

        let mut fields = Vec::new();
        if first.ipv4 != candidate.ixf_id.ipv4 {
            fields.push("ipaddr4");
        }
        if first.ipv6 != candidate.ixf_id.ipv6 {
            fields.push("ipaddr6");
        }
        fields.extend(self.changed_fields(first, &candidate.record));

        let detail = if gone.len() > 1 {
            "IP addresses moved to same entry"
        } else if first.ipv6.is_none() {
            "IPv6 not set"
        } else if first.ipv4.is_none() {
            "IPv4 not set"
        } else {
            "IP addresses moved to same entry"
        };

        format!("{}: {} {}", REASON_VALUES_CHANGED, fields.join(", "), detail)
    }

    fn delete(&mut self, session_id: SessionId, paired: bool) -> IxfResult<()> {
        let session = self
            .registry
            .session(session_id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("session", session_id))?;
        let key = ProposalKey::new(self.ixlan.id, session.ixf_id());
        let allowed = self
            .registry
            .network(session.asn)
            .is_some_and(|n| n.allow_ixp_update);

        if allowed {
            let before = self.latest_version(session_id);
            let after = self.registry.delete_session(session_id, SOURCE, self.now)?;
            self.entries.push(ImportLogEntry {
                session_id,
                action: Action::Delete.to_string(),
                reason: REASON_ENTRY_GONE_FROM_REMOTE.to_string(),
                version_before: before,
                version_after: after,
            });
            info!(ixlan = %self.ixlan.id, identity = %key.ixf_id, "Session deleted");
            if !paired {
                self.record(self.peer_for_session(&session), "delete", REASON_ENTRY_GONE_FROM_REMOTE);
            }
            self.resolve(&key);
            return Ok(());
        }

        // paired deletions are stored once their parent proposal exists
        if paired {
            return Ok(());
        }

        let upserted = self.upsert(
            key,
            ProposalDraft {
                action: Action::Delete,
                fields: session_fields(&session),
                data: Value::Null,
                reason: REASON_ENTRY_GONE_FROM_REMOTE.to_string(),
                error: None,
                requirement_of: None,
            },
        );
        self.record(
            self.peer_for_session(&session),
            "suggest-delete",
            REASON_ENTRY_GONE_FROM_REMOTE,
        );
        self.notify_upsert(upserted, false);
        Ok(())
    }

    fn noop(&mut self, candidate: &Candidate, session_id: SessionId) -> IxfResult<()> {
        let session = self
            .registry
            .session(session_id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("session", session_id))?;
        self.record(self.peer_for_session(&session), "noop", "");
        self.resolve(&ProposalKey::new(self.ixlan.id, candidate.ixf_id));
        Ok(())
    }

    fn change(
        &mut self,
        candidate: &Candidate,
        action: Action,
        existing: Option<SessionId>,
        fields: &[&'static str],
        children: &[SessionId],
    ) -> IxfResult<()> {
        let key = ProposalKey::new(self.ixlan.id, candidate.ixf_id);
        let (action, reason) = if !children.is_empty() {
            (Action::Modify, self.pair_reason(candidate, children))
        } else if action == Action::Add {
            (Action::Add, REASON_NEW_ENTRY.to_string())
        } else {
            (
                Action::Modify,
                format!("{}: {}", REASON_VALUES_CHANGED, fields.join(", ")),
            )
        };

        if candidate.network.allow_ixp_update {
            let (proposed, errors) = self.replacement(candidate, existing, children)?;
            if errors.is_empty() {
                return self.apply(proposed, existing, action, reason, &key);
            }

            let conflict = IxfError::apply_conflict(candidate.ixf_id.to_string(), errors.to_string());
            warn!(ixlan = %self.ixlan.id, "{}", conflict);
            self.log.error(conflict.to_string());

            let upserted = self.upsert(
                key,
                ProposalDraft {
                    action,
                    fields: candidate.fields(),
                    data: candidate.record.data.clone(),
                    reason: reason.clone(),
                    error: Some(errors.to_json()),
                    requirement_of: None,
                },
            );
            self.record(self.peer_for_record(candidate), &format!("suggest-{}", action), &reason);
            self.require_deletions(upserted.id, children);
            self.notify_upsert(upserted, true);
            return Ok(());
        }

        let upserted = self.upsert(
            key,
            ProposalDraft {
                action,
                fields: candidate.fields(),
                data: candidate.record.data.clone(),
                reason: reason.clone(),
                error: None,
                requirement_of: None,
            },
        );
        self.record(self.peer_for_record(candidate), &format!("suggest-{}", action), &reason);
        self.require_deletions(upserted.id, children);
        self.notify_upsert(upserted, false);
        Ok(())
    }

    /// Paired deletions of a parent that was not written: still active ones
    /// become requirements of the parent proposal, already deleted ones get
    /// their own run log record.
    fn require_deletions(&mut self, parent: ProposalId, children: &[SessionId]) {
        for child in children {
            let Some(gone) = self.registry.session(*child).cloned() else {
                continue;
            };
            if !gone.is_active() {
                self.record(self.peer_for_session(&gone), "delete", REASON_ENTRY_GONE_FROM_REMOTE);
                continue;
            }
            self.upsert(
                ProposalKey::new(self.ixlan.id, gone.ixf_id()),
                ProposalDraft {
                    action: Action::Delete,
                    fields: session_fields(&gone),
                    data: Value::Null,
                    reason: REASON_ENTRY_GONE_FROM_REMOTE.to_string(),
                    error: None,
                    requirement_of: Some(parent),
                },
            );
        }
    }

    /// Session as it would look after applying the candidate.
    fn build_session(&self, candidate: &Candidate, existing: Option<SessionId>) -> IxfResult<Session> {
        let record = &candidate.record;
        let Some(id) = existing else {
            return Ok(Session {
                id: SessionId::new(0),
                ixlan_id: self.ixlan.id,
                asn: candidate.ixf_id.asn,
                ipv4: candidate.ixf_id.ipv4,
                ipv6: candidate.ixf_id.ipv6,
                speed: record.speed,
                operational: record.operational,
                is_rs_peer: record.is_rs_peer.unwrap_or(false),
                status: SessionStatus::Active,
                created_at: self.now,
                updated_at: self.now,
            });
        };

        let mut session = self
            .registry
            .session(id)
            .cloned()
            .ok_or_else(|| IxfError::not_found("session", id))?;

        if !session.is_active() {
            session.status = SessionStatus::Active;
            session.speed = record.speed;
            session.operational = record.operational;
            session.is_rs_peer = record.is_rs_peer.unwrap_or(false);
            return Ok(session);
        }

        session.operational = record.operational;
        if self.config.reconcile.modify_speed && record.speed > 0 {
            session.speed = record.speed;
        }
        if self.config.reconcile.modify_is_rs_peer {
            if let Some(rs) = record.is_rs_peer {
                session.is_rs_peer = rs;
            }
        }
        Ok(session)
    }

    fn apply(
        &mut self,
        mut session: Session,
        existing: Option<SessionId>,
        action: Action,
        reason: String,
        key: &ProposalKey,
    ) -> IxfResult<()> {
        let before = existing.and_then(|id| self.latest_version(id));
        if existing.is_none() {
            session.id = self.registry.allocate_session_id();
        }
        let session_id = session.id;
        let peer = self.peer_for_session(&session);
        let after = self.registry.write_session(session, SOURCE, None, self.now);

        self.entries.push(ImportLogEntry {
            session_id,
            action: action.to_string(),
            reason: reason.clone(),
            version_before: before,
            version_after: after,
        });
        info!(ixlan = %self.ixlan.id, identity = %key.ixf_id, %action, "Session written");
        self.record(peer, &action.to_string(), &reason);
        self.resolve(key);
        Ok(())
    }

    /// Resolves proposals the run did not touch and that no longer apply:
    /// deletions that happened or were withdrawn, adds and modifications
    /// the feed dropped, and no-ops.
    fn cleanup(&mut self, seen: &HashSet<IxfId>) {
        let stale: Vec<ProposalKey> = self
            .registry
            .proposals()
            .for_lan(self.ixlan.id)
            .filter(|p| !self.touched.contains(&p.key))
            .filter(|p| self.options.asn.map_or(true, |asn| p.key.ixf_id.asn == asn))
            .filter(|p| !p.is_requirement())
            .filter(|p| match p.action {
                Action::Delete | Action::Noop => true,
                Action::Add | Action::Modify => !seen.contains(&p.key.ixf_id),
            })
            .map(|p| p.key)
            .collect();

        for key in stale {
            self.resolve(&key);
        }
    }

    fn upsert(&mut self, key: ProposalKey, draft: ProposalDraft) -> Upserted {
        self.touched.insert(key);
        let upserted = self.registry.proposals_mut().upsert(key, draft, self.now);
        debug!(identity = %key.ixf_id, outcome = ?upserted.outcome, "Proposal upserted");
        upserted
    }

    fn resolve(&mut self, key: &ProposalKey) {
        self.touched.insert(*key);
        for proposal in self.registry.proposals_mut().resolve(key) {
            self.touched.insert(proposal.key);
            debug!(identity = %proposal.key.ixf_id, action = %proposal.action, "Proposal resolved");
            if proposal.ticket.is_some() {
                self.notifications
                    .push(Notification::resolved(&self.exchange, &proposal));
            }
        }
    }

    fn notify_upsert(&mut self, upserted: Upserted, conflict: bool) {
        if !upserted.should_notify() {
            return;
        }
        if let Some(proposal) = self.registry.proposals().get(upserted.id) {
            self.notifications
                .push(Notification::for_proposal(&self.exchange, proposal, conflict));
        }
    }

    fn latest_version(&self, session_id: SessionId) -> Option<VersionId> {
        self.registry
            .versions()
            .latest_for(session_id)
            .map(|v| v.id)
    }

    fn ignore(&mut self, record: &RemoteRecord, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(identity = %record.ixf_id, reason = %reason, "Record ignored");
        let mut peer = self.peer(Some(record.ixf_id.asn));
        peer.ipaddr4 = record.ixf_id.ipv4;
        peer.ipaddr6 = record.ixf_id.ipv6;
        self.log.push(RunLogEntry {
            peer,
            action: "ignore".to_string(),
            reason,
        });
    }

    fn record(&mut self, peer: PeerInfo, action: &str, reason: &str) {
        self.log.push(RunLogEntry {
            peer,
            action: action.to_string(),
            reason: reason.to_string(),
        });
    }

    fn peer(&self, asn: Option<Asn>) -> PeerInfo {
        PeerInfo {
            ixlan_id: self.ixlan.id,
            ix_id: self.exchange.id,
            ix_name: self.exchange.name.clone(),
            asn,
            net_id: asn.and_then(|asn| self.registry.network(asn)).map(|n| n.id),
            ipaddr4: None,
            ipaddr6: None,
            speed: None,
            is_rs_peer: None,
            operational: None,
        }
    }

    fn peer_for_session(&self, session: &Session) -> PeerInfo {
        PeerInfo {
            ipaddr4: session.ipv4,
            ipaddr6: session.ipv6,
            speed: Some(session.speed),
            is_rs_peer: Some(session.is_rs_peer),
            operational: Some(session.operational),
            ..self.peer(Some(session.asn))
        }
    }

    fn peer_for_record(&self, candidate: &Candidate) -> PeerInfo {
        PeerInfo {
            net_id: Some(candidate.network.id),
            ipaddr4: candidate.ixf_id.ipv4,
            ipaddr6: candidate.ixf_id.ipv6,
            speed: Some(candidate.record.speed),
            is_rs_peer: candidate.record.is_rs_peer,
            operational: Some(candidate.record.operational),
            ..self.peer(Some(candidate.ixf_id.asn))
        }
    }
}
