//! Integration tests for the reconciler
//!
//! Runs whole member lists through `Reconciler::update` against a seeded
//! registry and checks sessions, proposals, import logs and rollback.

use chrono::{DateTime, Duration, Utc};
use ixf_common::{ImporterConfig, Network};
use ixf_importer::feed::sanitize::NO_VLAN_ENTRIES;
use ixf_importer::import_log::log_status;
use ixf_importer::proposal::REASON_VALUES_CHANGED;
use ixf_importer::{
    rollback, Action, Exchange, ImportOutcome, IxLan, LanPrefix, PostMortem, ProposalKey,
    Reconciler, Registry, RollbackStatus, UpdateOptions,
};
use ixf_types::{Asn, ExchangeId, IxLanId, IxfId};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const LAN: IxLanId = IxLanId::new(1);

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn asn() -> Asn {
    Asn::new(64500).unwrap()
}

fn v4(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 0, 2, last)
}

fn v6(last: u16) -> Ipv6Addr {
    Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, last)
}

/// Test fixture: one exchange with one dual-stack LAN and one network
struct TestSetup {
    registry: Registry,
    config: ImporterConfig,
}

impl TestSetup {
    fn new(allow_ixp_update: bool) -> Self {
        let mut registry = Registry::new();
        registry.add_exchange(Exchange::new(ExchangeId::new(1), "Example IX"));

        let mut lan = IxLan::new(LAN, ExchangeId::new(1));
        lan.name = "Example IX peering LAN".to_string();
        lan.member_list_url = Some("https://ix.example/ixf.json".to_string());
        lan.prefixes = vec![
            LanPrefix {
                prefix: "192.0.2.0/24".parse().unwrap(),
                active: true,
            },
            LanPrefix {
                prefix: "2001:db8::/64".parse().unwrap(),
                active: true,
            },
        ];
        registry.add_ixlan(lan);

        let mut network = Network::new(10, asn(), "Example Net");
        network.allow_ixp_update = allow_ixp_update;
        registry.add_network(network);

        Self {
            registry,
            config: ImporterConfig::default(),
        }
    }

    fn seed_session(&mut self, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) {
        self.registry
            .add_session(LAN, asn(), ipv4, ipv6, 10000, false, t0() - Duration::days(30));
    }

    fn update_at(&mut self, data: Value, commit: bool, now: DateTime<Utc>) -> ImportOutcome {
        Reconciler::new(&self.config, now)
            .update(
                &mut self.registry,
                LAN,
                Ok(data),
                UpdateOptions { commit, asn: None },
            )
            .expect("update failed")
    }

    fn commit(&mut self, data: Value) -> ImportOutcome {
        self.update_at(data, true, t0())
    }

    fn active(&self) -> Vec<IxfId> {
        let mut ids: Vec<IxfId> = self
            .registry
            .active_sessions_on(LAN)
            .map(|s| s.ixf_id())
            .collect();
        ids.sort();
        ids
    }
}

/// Member list with one connection per `(ipv4, ipv6)` pair, all at 10G.
fn member_list(entries: &[(Option<Ipv4Addr>, Option<Ipv6Addr>)]) -> Value {
    let connections: Vec<Value> = entries
        .iter()
        .map(|(ipv4, ipv6)| {
            let mut vlan = json!({"vlan_id": 0});
            if let Some(ip) = ipv4 {
                vlan["ipv4"] = json!({"address": ip.to_string()});
            }
            if let Some(ip) = ipv6 {
                vlan["ipv6"] = json!({"address": ip.to_string()});
            }
            json!({
                "state": "active",
                "if_list": [{"if_speed": 10000}],
                "vlan_list": [vlan]
            })
        })
        .collect();

    json!({
        "version": "1.0",
        "member_list": [{
            "asnum": 64500,
            "member_type": "peering",
            "connection_list": connections
        }]
    })
}

#[test]
fn test_feed_without_vlan_entries_changes_nothing() {
    let mut setup = TestSetup::new(true);
    setup.seed_session(Some(v4(1)), None);
    let data = json!({
        "version": "1.0",
        "member_list": [{
            "asnum": 64500,
            "connection_list": [{"state": "active", "vlan_list": []}]
        }]
    });

    let outcome = setup.commit(data);

    assert!(!outcome.success);
    assert_eq!(outcome.log.errors, vec![NO_VLAN_ENTRIES.to_string()]);
    assert!(outcome.import_log.is_none());
    assert_eq!(setup.active(), vec![IxfId::new(asn(), Some(v4(1)), None)]);
    assert!(setup.registry.proposals().is_empty());
    assert_eq!(
        setup.registry.ixlan(LAN).unwrap().import_error.as_deref(),
        Some(NO_VLAN_ENTRIES)
    );
}

#[test]
fn test_autonomous_network_is_updated_directly() {
    let mut setup = TestSetup::new(true);
    for last in 1..=4 {
        setup.seed_session(Some(v4(last)), None);
    }
    let data = member_list(&[
        (Some(v4(1)), None),
        (Some(v4(2)), None),
        (Some(v4(3)), None),
        (Some(v4(5)), None),
    ]);

    let outcome = setup.commit(data);

    assert!(outcome.success);
    assert_eq!(outcome.log.with_action("delete").count(), 1);
    assert_eq!(outcome.log.with_action("add").count(), 1);
    assert_eq!(outcome.log.with_action("noop").count(), 3);
    assert_eq!(
        setup.active(),
        vec![
            IxfId::new(asn(), Some(v4(1)), None),
            IxfId::new(asn(), Some(v4(2)), None),
            IxfId::new(asn(), Some(v4(3)), None),
            IxfId::new(asn(), Some(v4(5)), None),
        ]
    );
    assert!(setup.registry.proposals().is_empty());

    let log = setup
        .registry
        .import_logs()
        .get(outcome.import_log.unwrap())
        .unwrap();
    let actions: Vec<&str> = log.entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["delete", "add"]);
}

#[test]
fn test_non_autonomous_network_gets_proposals() {
    let mut setup = TestSetup::new(false);
    for last in 1..=4 {
        setup.seed_session(Some(v4(last)), None);
    }
    let data = member_list(&[
        (Some(v4(1)), None),
        (Some(v4(2)), None),
        (Some(v4(3)), None),
        (Some(v4(5)), None),
    ]);
    let before = setup.active();

    let first = setup.commit(data.clone());

    assert!(first.import_log.is_none());
    assert_eq!(setup.active(), before);
    let mut actions: Vec<Action> = setup.registry.proposals().iter().map(|p| p.action).collect();
    actions.sort_by_key(|a| a.to_string());
    assert_eq!(actions, vec![Action::Add, Action::Delete]);
    assert_eq!(first.notifications.len(), 2);

    let ids: Vec<_> = setup.registry.proposals().iter().map(|p| p.id).collect();
    let second = setup.update_at(data, true, t0() + Duration::hours(1));

    assert!(second.notifications.is_empty());
    assert_eq!(
        setup.registry.proposals().iter().map(|p| p.id).collect::<Vec<_>>(),
        ids
    );
}

#[test]
fn test_repeated_runs_converge() {
    let mut setup = TestSetup::new(true);
    setup.seed_session(Some(v4(1)), Some(v6(1)));
    let data = member_list(&[(Some(v4(1)), Some(v6(1))), (Some(v4(2)), Some(v6(2)))]);

    let first = setup.commit(data.clone());
    assert_eq!(first.log.with_action("add").count(), 1);
    let sessions = setup.registry.sessions().count();
    let versions = setup.registry.versions().len();

    let second = setup.update_at(data, true, t0() + Duration::hours(1));

    assert!(second.import_log.is_none());
    assert_eq!(second.log.with_action("noop").count(), 2);
    assert_eq!(setup.registry.sessions().count(), sessions);
    assert_eq!(setup.registry.versions().len(), versions);
    assert!(setup.registry.proposals().is_empty());
}

#[test]
fn test_no_address_is_held_twice() {
    let mut setup = TestSetup::new(true);
    let other = Asn::new(64501).unwrap();
    setup
        .registry
        .add_network(Network::new(11, other, "Other Net"));
    setup
        .registry
        .add_session(LAN, other, Some(v4(9)), None, 10000, false, t0());

    // The other network has not approved losing its address.
    let outcome = setup.commit(member_list(&[(Some(v4(9)), None)]));

    assert_eq!(outcome.log.with_action("suggest-delete").count(), 1);
    assert_eq!(outcome.log.with_action("suggest-add").count(), 1);
    let conflict = setup
        .registry
        .proposals()
        .find(&ProposalKey::new(LAN, IxfId::new(asn(), Some(v4(9)), None)))
        .cloned()
        .unwrap();
    assert!(conflict
        .error
        .as_deref()
        .unwrap()
        .contains("Ip address already exists elsewhere"));

    let mut held: HashSet<IpAddr> = HashSet::new();
    for session in setup.registry.active_sessions_on(LAN) {
        for addr in session.addresses() {
            assert!(held.insert(addr), "{} held by two active sessions", addr);
        }
    }
    assert_eq!(held.len(), 1);
    let keys: HashSet<ProposalKey> = setup.registry.proposals().iter().map(|p| p.key).collect();
    assert_eq!(keys.len(), setup.registry.proposals().len());
}

#[test]
fn test_deletion_frees_address_for_new_entry() {
    let mut setup = TestSetup::new(true);
    setup.seed_session(Some(v4(1)), None);

    let outcome = setup.commit(member_list(&[(Some(v4(1)), Some(v6(1)))]));

    assert!(outcome.log.errors.is_empty());
    assert_eq!(setup.active(), vec![IxfId::new(asn(), Some(v4(1)), Some(v6(1)))]);

    let modify: Vec<_> = outcome.log.with_action("modify").collect();
    assert_eq!(modify.len(), 1);
    assert_eq!(
        modify[0].reason,
        format!("{}: ipaddr6 IPv6 not set", REASON_VALUES_CHANGED)
    );
    assert_eq!(outcome.log.with_action("delete").count(), 0);

    let log = setup
        .registry
        .import_logs()
        .get(outcome.import_log.unwrap())
        .unwrap();
    let actions: Vec<&str> = log.entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(actions, vec!["delete", "modify"]);
}

#[test]
fn test_protocol_change_is_one_proposal() {
    let mut setup = TestSetup::new(false);
    setup.seed_session(Some(v4(1)), None);
    let data = member_list(&[(Some(v4(1)), Some(v6(1)))]);

    let outcome = setup.commit(data.clone());

    assert_eq!(outcome.notifications.len(), 1);
    let parent = setup
        .registry
        .proposals()
        .find(&ProposalKey::new(LAN, IxfId::new(asn(), Some(v4(1)), Some(v6(1)))))
        .cloned()
        .unwrap();
    assert_eq!(parent.action, Action::Modify);
    assert!(parent.reason.ends_with("IPv6 not set"));

    let child = setup
        .registry
        .proposals()
        .find(&ProposalKey::new(LAN, IxfId::new(asn(), Some(v4(1)), None)))
        .cloned()
        .unwrap();
    assert_eq!(child.action, Action::Delete);
    assert_eq!(child.requirement_of, Some(parent.id));
    assert_eq!(setup.active(), vec![IxfId::new(asn(), Some(v4(1)), None)]);

    let again = setup.update_at(data, true, t0() + Duration::hours(1));
    assert!(again.notifications.is_empty());
    assert_eq!(setup.registry.proposals().len(), 2);

    // The network enables the change itself: both proposals go away.
    setup.registry.network_mut(asn()).unwrap().allow_ixp_update = true;
    setup.update_at(member_list(&[(Some(v4(1)), Some(v6(1)))]), true, t0() + Duration::hours(2));
    assert!(setup.registry.proposals().is_empty());
    assert_eq!(setup.active(), vec![IxfId::new(asn(), Some(v4(1)), Some(v6(1)))]);
}

#[test]
fn test_rollback_restores_previous_state() {
    let mut setup = TestSetup::new(true);
    setup.seed_session(Some(v4(1)), None);
    setup.seed_session(Some(v4(2)), None);

    let outcome = setup.commit(member_list(&[(Some(v4(1)), None), (Some(v4(3)), None)]));
    let log_id = outcome.import_log.unwrap();
    assert_eq!(
        log_status(&setup.registry, log_id).unwrap(),
        vec![RollbackStatus::CanRollback, RollbackStatus::CanRollback]
    );

    rollback(&mut setup.registry, log_id, t0() + Duration::hours(1)).unwrap();

    assert_eq!(
        setup.active(),
        vec![
            IxfId::new(asn(), Some(v4(1)), None),
            IxfId::new(asn(), Some(v4(2)), None),
        ]
    );
    assert_eq!(
        log_status(&setup.registry, log_id).unwrap(),
        vec![
            RollbackStatus::AlreadyRolledBack,
            RollbackStatus::AlreadyRolledBack
        ]
    );
    assert!(rollback(&mut setup.registry, log_id, t0() + Duration::hours(2)).is_err());
}

#[test]
fn test_rollback_refused_after_later_change() {
    let mut setup = TestSetup::new(true);

    let first = setup.commit(member_list(&[(Some(v4(1)), None)]));
    let mut data = member_list(&[(Some(v4(1)), None)]);
    data["member_list"][0]["connection_list"][0]["if_list"] = json!([{"if_speed": 100000}]);
    let second = setup.update_at(data, true, t0() + Duration::hours(1));
    assert_eq!(second.log.with_action("modify").count(), 1);

    let first_log = first.import_log.unwrap();
    assert_eq!(
        log_status(&setup.registry, first_log).unwrap(),
        vec![RollbackStatus::ChangedSince]
    );
    let versions = setup.registry.versions().len();
    assert!(rollback(&mut setup.registry, first_log, t0() + Duration::hours(2)).is_err());
    assert_eq!(setup.registry.versions().len(), versions);

    rollback(&mut setup.registry, second.import_log.unwrap(), t0() + Duration::hours(2)).unwrap();
    let session = setup.registry.active_sessions_on(LAN).next().unwrap();
    assert_eq!(session.speed, 10000);
}

#[test]
fn test_postmortem_lists_applied_changes() {
    let mut setup = TestSetup::new(true);
    setup.commit(member_list(&[(Some(v4(1)), None)]));
    let mut data = member_list(&[(Some(v4(1)), None)]);
    data["member_list"][0]["connection_list"][0]["if_list"] = json!([{"if_speed": 100000}]);
    setup.update_at(data, true, t0() + Duration::hours(1));

    let report = PostMortem::new(&setup.config)
        .generate(&setup.registry, asn(), 10)
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report[0].action, "modify");
    assert_eq!(report[0].speed, 100000);
    assert_eq!(report[0].changes["speed"].from, json!(10000));
    assert_eq!(report[0].changes["speed"].to, json!(100000));
    assert_eq!(report[1].action, "add");
    assert!(report[1].changes.is_empty());
    assert_eq!(report[1].ix_name, "Example IX");
}
