//! Integration tests for the batch runner
//!
//! Tests the full import workflow including:
//! - LAN selection and per-LAN failure isolation
//! - Notification flush and aged proposal escalation
//! - Command line resets
//! - Registry state persistence

mod feed_helper;

use chrono::{DateTime, Duration, Utc};
use ixf_common::{Contact, ContactRole, ImporterConfig, MemoryMailSink, MemoryTicketSink, Network};
use ixf_importer::{
    BatchOptions, BatchRunner, Exchange, IxLan, LanPrefix, Registry, ResetOptions,
};
use feed_helper::StaticFeed;
use ixf_types::{Asn, ExchangeId, IxLanId};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

const URL_A: &str = "https://a.ix.example/ixf.json";
const URL_B: &str = "https://b.ix.example/ixf.json";

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn asn() -> Asn {
    Asn::new(64500).unwrap()
}

fn lan(id: u64, exchange: u64, url: &str, prefix: &str) -> IxLan {
    let mut lan = IxLan::new(IxLanId::new(id), ExchangeId::new(exchange));
    lan.name = format!("LAN {}", id);
    lan.member_list_url = Some(url.to_string());
    lan.prefixes.push(LanPrefix {
        prefix: prefix.parse().unwrap(),
        active: true,
    });
    lan
}

fn member_list(address: &str) -> Value {
    json!({
        "version": "1.0",
        "member_list": [{
            "asnum": 64500,
            "connection_list": [{
                "state": "active",
                "if_list": [{"if_speed": 10000}],
                "vlan_list": [{"vlan_id": 0, "ipv4": {"address": address}}]
            }]
        }]
    })
}

/// Test fixture: two exchanges, one LAN each, a network that does not
/// accept direct updates and in-memory sinks
struct TestSetup {
    registry: Registry,
    feed: Arc<StaticFeed>,
    mail: Arc<MemoryMailSink>,
    tickets: Arc<MemoryTicketSink>,
    config: ImporterConfig,
}

impl TestSetup {
    fn new() -> Self {
        let mut registry = Registry::new();
        let mut exchange = Exchange::new(ExchangeId::new(1), "Example IX");
        exchange.tech_email = Some("noc@ix.example".to_string());
        registry.add_exchange(exchange);
        registry.add_exchange(Exchange::new(ExchangeId::new(2), "Other IX"));
        registry.add_ixlan(lan(1, 1, URL_A, "192.0.2.0/24"));
        registry.add_ixlan(lan(2, 2, URL_B, "198.51.100.0/24"));
        registry.add_network(Network::new(10, asn(), "Example Net"));

        let mut config = ImporterConfig::default();
        config.notify.notify_ix = true;
        config.notify.notify_net = true;

        Self {
            registry,
            feed: Arc::new(StaticFeed::new()),
            mail: Arc::new(MemoryMailSink::new()),
            tickets: Arc::new(MemoryTicketSink::new()),
            config,
        }
    }

    fn runner(&self) -> BatchRunner {
        BatchRunner::new(
            self.config.clone(),
            self.feed.clone(),
            self.mail.clone(),
            self.tickets.clone(),
        )
    }

    fn ticket_count(&self, needle: &str) -> usize {
        self.tickets
            .tickets()
            .iter()
            .filter(|t| t.subject.contains(needle))
            .count()
    }
}

fn commit() -> BatchOptions {
    BatchOptions {
        commit: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_broken_lan_does_not_stop_the_batch() {
    let mut setup = TestSetup::new();
    // LAN 3 points at an exchange the registry does not know.
    setup
        .registry
        .add_ixlan(lan(3, 99, "https://c.ix.example/ixf.json", "203.0.113.0/24"));
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.fail(URL_B, "Got HTTP status 500");
    setup
        .feed
        .serve("https://c.ix.example/ixf.json", member_list("203.0.113.1"));

    let report = setup
        .runner()
        .run(&mut setup.registry, &commit(), t0())
        .await
        .unwrap();

    assert!(report.failed());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].ixlan_id, IxLanId::new(3));
    assert_eq!(report.failures[0].url, "https://c.ix.example/ixf.json");

    let succeeded: Vec<(IxLanId, bool)> = report
        .outcomes
        .iter()
        .map(|o| (o.ixlan_id, o.success))
        .collect();
    assert_eq!(
        succeeded,
        vec![(IxLanId::new(1), true), (IxLanId::new(2), false)]
    );
    assert_eq!(setup.registry.proposals().len(), 1);
    assert_eq!(
        setup
            .registry
            .ixlan(IxLanId::new(2))
            .unwrap()
            .import_error
            .as_deref(),
        Some("Got HTTP status 500")
    );
    assert!(setup.registry.attempt(IxLanId::new(3)).is_none());
}

#[tokio::test]
async fn test_notifications_are_consolidated_per_exchange() {
    let mut setup = TestSetup::new();
    setup.registry.network_mut(asn()).unwrap().contacts = vec![Contact {
        role: ContactRole::Technical,
        email: "peering@net.example".to_string(),
    }];
    setup.feed.serve(
        URL_A,
        json!({
            "version": "1.0",
            "member_list": [{
                "asnum": 64500,
                "connection_list": [
                    {"if_list": [{"if_speed": 10000}], "vlan_list": [{"vlan_id": 0, "ipv4": {"address": "192.0.2.1"}}]},
                    {"if_list": [{"if_speed": 10000}], "vlan_list": [{"vlan_id": 0, "ipv4": {"address": "192.0.2.2"}}]}
                ]
            }]
        }),
    );
    setup.feed.serve(URL_B, member_list("198.51.100.1"));

    let report = setup
        .runner()
        .run(&mut setup.registry, &commit(), t0())
        .await
        .unwrap();

    // one mail to Example IX, one to the network; Other IX has no contact
    assert_eq!(setup.mail.count(), 2);
    assert_eq!(report.notify.emails_sent, 2);
    assert_eq!(setup.ticket_count("Several Actions May Be Needed for Exchange Other IX"), 1);

    let sent = setup.mail.sent();
    let to_network = sent
        .iter()
        .find(|m| m.recipients == vec!["peering@net.example".to_string()])
        .unwrap();
    assert!(to_network.body.contains("192.0.2.1"));
    assert!(to_network.body.contains("198.51.100.1"));

    // nothing changed: nothing is sent again
    setup
        .runner()
        .run(&mut setup.registry, &commit(), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(setup.mail.count(), 2);
}

#[tokio::test]
async fn test_aged_proposal_is_ticketed_once() {
    let mut setup = TestSetup::new();
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.serve(URL_B, member_list("198.51.100.1"));
    let runner = setup.runner();

    runner
        .run(&mut setup.registry, &commit(), t0())
        .await
        .unwrap();
    assert_eq!(setup.ticket_count("IX-F Conflict Resolution"), 0);

    let report = runner
        .run(&mut setup.registry, &commit(), t0() + Duration::days(15))
        .await
        .unwrap();
    assert_eq!(setup.ticket_count("IX-F Conflict Resolution"), 2);
    assert_eq!(report.notify.tickets_created, 2);
    assert!(setup.registry.proposals().iter().all(|p| p.ticket.is_some()));

    runner
        .run(&mut setup.registry, &commit(), t0() + Duration::days(16))
        .await
        .unwrap();
    assert_eq!(setup.ticket_count("IX-F Conflict Resolution"), 2);

    // The exchange drops the entry: the ticket is told about it.
    setup.feed.serve(URL_A, json!({"version": "1.0", "member_list": []}));
    let report = runner
        .run(&mut setup.registry, &commit(), t0() + Duration::days(17))
        .await
        .unwrap();
    assert_eq!(report.notify.tickets_updated, 1);
    assert_eq!(setup.registry.proposals().len(), 1);
    let updated: Vec<_> = setup
        .tickets
        .tickets()
        .into_iter()
        .filter(|t| t.updates.iter().any(|u| u.starts_with("Resolved:")))
        .collect();
    assert_eq!(updated.len(), 1);
    assert!(updated[0].subject.contains("192.0.2.1"));
}

#[tokio::test]
async fn test_ticketing_outage_keeps_committed_lans() {
    let mut setup = TestSetup::new();
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.serve(URL_B, member_list("198.51.100.1"));
    setup.tickets.set_failing(true);
    let runner = setup.runner();

    let report = runner
        .run(&mut setup.registry, &commit(), t0())
        .await
        .unwrap();
    assert!(!report.failed());
    assert!(report.notify.tickets_failed > 0);
    assert_eq!(setup.tickets.count(), 0);
    assert_eq!(setup.registry.proposals().len(), 2);
    assert!(setup.registry.attempt(IxLanId::new(1)).is_some());
    assert!(setup.registry.attempt(IxLanId::new(2)).is_some());

    // aged proposals stay unticketed while the sink is down
    let report = runner
        .run(&mut setup.registry, &commit(), t0() + Duration::days(15))
        .await
        .unwrap();
    assert!(report.notify.tickets_failed >= 2);
    assert!(setup.registry.proposals().iter().all(|p| p.ticket.is_none()));

    setup.tickets.set_failing(false);
    let report = runner
        .run(&mut setup.registry, &commit(), t0() + Duration::days(16))
        .await
        .unwrap();
    assert_eq!(report.notify.tickets_failed, 0);
    assert_eq!(setup.ticket_count("IX-F Conflict Resolution"), 2);
    assert!(setup.registry.proposals().iter().all(|p| p.ticket.is_some()));
}

#[tokio::test]
async fn test_resets_require_commit_and_leave_an_audit_ticket() {
    let mut setup = TestSetup::new();
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.serve(URL_B, member_list("198.51.100.1"));
    let runner = setup.runner();
    runner
        .run(&mut setup.registry, &commit(), t0())
        .await
        .unwrap();
    assert_eq!(setup.registry.proposals().len(), 2);

    let preview_reset = BatchOptions {
        resets: ResetOptions {
            hints: true,
            ..Default::default()
        },
        skip_import: true,
        ..Default::default()
    };
    let report = runner
        .run(&mut setup.registry, &preview_reset, t0())
        .await
        .unwrap();
    assert!(report.resets.is_empty());
    assert_eq!(setup.registry.proposals().len(), 2);

    let reset = BatchOptions {
        commit: true,
        skip_import: true,
        resets: ResetOptions::all(),
        ..Default::default()
    };
    let report = runner
        .run(&mut setup.registry, &reset, t0())
        .await
        .unwrap();
    assert_eq!(report.resets.len(), 4);
    assert!(setup.registry.proposals().is_empty());
    assert!(setup.registry.emails().is_empty());
    assert_eq!(setup.ticket_count("[IX-F] command-line reset"), 1);

    let mut production = setup.config.clone();
    production.release_env = "prod".to_string();
    let refused = BatchRunner::new(
        production,
        setup.feed.clone(),
        setup.mail.clone(),
        setup.tickets.clone(),
    )
    .run(&mut setup.registry, &reset, t0())
    .await;
    assert!(refused.is_err());
}

#[tokio::test]
async fn test_preview_persists_nothing() {
    let mut setup = TestSetup::new();
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.serve(URL_B, member_list("198.51.100.1"));

    let options = BatchOptions {
        commit: true,
        preview: true,
        ..Default::default()
    };
    let report = setup
        .runner()
        .run(&mut setup.registry, &options, t0())
        .await
        .unwrap();

    assert_eq!(report.combined_log().with_action("suggest-add").count(), 2);
    assert!(setup.registry.proposals().is_empty());
    assert!(setup.registry.attempt(IxLanId::new(1)).is_none());
    assert_eq!(setup.mail.count(), 0);
    assert_eq!(setup.tickets.count(), 0);
}

#[tokio::test]
async fn test_asn_selects_lans_with_sessions() {
    let mut setup = TestSetup::new();
    setup.registry.add_session(
        IxLanId::new(2),
        asn(),
        Some("198.51.100.1".parse().unwrap()),
        None,
        10000,
        false,
        t0(),
    );

    let options = BatchOptions {
        asn: Some(asn()),
        ..Default::default()
    };
    let selected: Vec<IxLanId> = setup
        .runner()
        .select(&setup.registry, &options)
        .iter()
        .map(|lan| lan.id)
        .collect();
    assert_eq!(selected, vec![IxLanId::new(2)]);

    let options = BatchOptions {
        ixlans: vec![IxLanId::new(1)],
        asn: Some(asn()),
        ..Default::default()
    };
    let selected: Vec<IxLanId> = setup
        .runner()
        .select(&setup.registry, &options)
        .iter()
        .map(|lan| lan.id)
        .collect();
    assert_eq!(selected, vec![IxLanId::new(1)]);
}

#[test]
fn test_state_survives_save_and_load() {
    let mut setup = TestSetup::new();
    setup.feed.serve(URL_A, member_list("192.0.2.1"));
    setup.feed.serve(URL_B, member_list("198.51.100.1"));
    let runner = setup.runner();
    tokio_test::block_on(runner.run(&mut setup.registry, &commit(), t0())).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    setup.registry.save(&path).unwrap();
    let mut loaded = Registry::load(&path).unwrap();

    let before: Vec<_> = setup.registry.proposals().iter().cloned().collect();
    let after: Vec<_> = loaded.proposals().iter().cloned().collect();
    assert_eq!(before, after);

    // ids keep counting from where the saved state left off
    let report =
        tokio_test::block_on(runner.run(&mut loaded, &commit(), t0() + Duration::hours(1))).unwrap();
    assert!(report.outcomes.iter().all(|o| o.notifications.is_empty()));
    assert_eq!(loaded.proposals().len(), 2);
}
