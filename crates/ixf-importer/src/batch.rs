//! Batch runner: resets, LAN selection, the per-LAN loop and the final
//! notifier flush.

use crate::feed::client::MISSING_URL;
use crate::feed::FeedSource;
use crate::notify::{EscalationNotifier, Notification, NotifyReport};
use crate::reconcile::{ImportOutcome, Reconciler, UpdateOptions};
use crate::registry::{IxLan, Registry, TicketRecord};
use crate::run_log::RunLog;
use chrono::{DateTime, Utc};
use ixf_common::{ImporterConfig, IxfError, IxfResult, MailSink, TicketSink};
use ixf_types::{Asn, IxLanId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// State resets applied before importing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Drop every proposal.
    pub hints: bool,
    pub dismisses: bool,
    pub tickets: bool,
    pub email: bool,
}

impl ResetOptions {
    pub fn all() -> Self {
        ResetOptions {
            hints: true,
            dismisses: true,
            tickets: true,
            email: true,
        }
    }

    pub fn any(&self) -> bool {
        self.hints || self.dismisses || self.tickets || self.email
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub commit: bool,
    /// Forces `commit` off.
    pub preview: bool,
    pub asn: Option<Asn>,
    pub ixlans: Vec<IxLanId>,
    /// Read member lists from the cache only.
    pub cache_only: bool,
    /// Fetch and cache member lists without importing them.
    pub skip_import: bool,
    pub resets: ResetOptions,
}

impl BatchOptions {
    pub fn commits(&self) -> bool {
        self.commit && !self.preview
    }
}

/// A LAN whose run failed with a system level error and was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanFailure {
    pub ixlan_id: IxLanId,
    pub name: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ImportOutcome>,
    pub failures: Vec<LanFailure>,
    pub notify: NotifyReport,
    /// Descriptions of the resets that were applied.
    pub resets: Vec<String>,
}

impl BatchReport {
    /// Some LAN failed at system level.
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Run logs of every LAN, in processing order.
    pub fn combined_log(&self) -> RunLog {
        let mut combined = RunLog::new();
        for outcome in &self.outcomes {
            combined.extend(outcome.log.clone());
        }
        for failure in &self.failures {
            combined.error(format!(
                "{} ({}): {}",
                failure.name, failure.url, failure.error
            ));
        }
        combined
    }
}

pub struct BatchRunner {
    config: ImporterConfig,
    feed: Arc<dyn FeedSource>,
    mail: Arc<dyn MailSink>,
    tickets: Arc<dyn TicketSink>,
}

impl BatchRunner {
    pub fn new(
        config: ImporterConfig,
        feed: Arc<dyn FeedSource>,
        mail: Arc<dyn MailSink>,
        tickets: Arc<dyn TicketSink>,
    ) -> Self {
        BatchRunner {
            config,
            feed,
            mail,
            tickets,
        }
    }

    fn notifier(&self) -> EscalationNotifier<'_> {
        EscalationNotifier::new(&self.config, self.mail.as_ref(), self.tickets.as_ref())
    }

    /// LANs to import: the explicitly named ones, else those where `asn`
    /// has an active session, else all of them. Only importable LANs are
    /// ever selected.
    pub fn select(&self, registry: &Registry, options: &BatchOptions) -> Vec<IxLan> {
        registry
            .ixlans()
            .filter(|lan| lan.importable())
            .filter(|lan| {
                if !options.ixlans.is_empty() {
                    options.ixlans.contains(&lan.id)
                } else if let Some(asn) = options.asn {
                    registry.active_sessions_on(lan.id).any(|s| s.asn == asn)
                } else {
                    true
                }
            })
            .cloned()
            .collect()
    }

    async fn fetch(&self, url: &str, cache_only: bool) -> IxfResult<Value> {
        if url.trim().is_empty() {
            return Err(IxfError::feed_unreachable(url, MISSING_URL));
        }
        let timeout = self.config.fetch_timeout();
        if cache_only {
            self.feed.fetch_cached(url)
        } else if self.config.feed.fallback_to_cache {
            self.feed.fetch_with_fallback(url, timeout).await
        } else {
            self.feed.fetch(url, timeout).await
        }
    }

    #[instrument(skip_all, fields(commit = options.commits()))]
    pub async fn run(
        &self,
        registry: &mut Registry,
        options: &BatchOptions,
        now: DateTime<Utc>,
    ) -> IxfResult<BatchReport> {
        let commit = options.commits();
        let mut report = BatchReport {
            resets: self.reset(registry, options.resets, commit, now).await?,
            ..Default::default()
        };

        let lans = self.select(registry, options);
        info!(lans = lans.len(), "Starting IX-F import");

        let reconciler = Reconciler::new(&self.config, now);
        let mut notifications: Vec<Notification> = Vec::new();

        for lan in lans {
            let url = lan.url().to_string();
            let feed = self.fetch(&url, options.cache_only).await;

            if options.skip_import {
                if let Err(e) = &feed {
                    warn!(ixlan = %lan.id, url = %url, error = %e, "Member list not cached");
                }
                continue;
            }

            let update = UpdateOptions {
                commit,
                asn: options.asn,
            };
            match registry.transaction(|registry| reconciler.update(registry, lan.id, feed, update)) {
                Ok(mut outcome) => {
                    notifications.append(&mut outcome.notifications);
                    report.outcomes.push(outcome);
                }
                Err(e) => {
                    error!(ixlan = %lan.id, name = %lan.name, url = %url, error = %e, "IX-F import failed");
                    report.failures.push(LanFailure {
                        ixlan_id: lan.id,
                        name: lan.name.clone(),
                        url,
                        error: e.to_string(),
                    });
                }
            }
        }

        if commit {
            let notifier = self.notifier();
            report.notify = notifier.flush(registry, notifications, now).await;
            report.notify.merge(notifier.escalate_aged(registry, now).await);
            report.notify.merge(notifier.resend_failed(registry, now).await);
        }

        Ok(report)
    }

    /// Applies the requested resets. Without `commit` nothing changes and
    /// nothing is returned; production deployments refuse resets.
    pub async fn reset(
        &self,
        registry: &mut Registry,
        resets: ResetOptions,
        commit: bool,
        now: DateTime<Utc>,
    ) -> IxfResult<Vec<String>> {
        if !resets.any() {
            return Ok(Vec::new());
        }
        if self.config.is_production() {
            return Err(IxfError::invalid_config(
                "release_env",
                "Resets are not allowed in production",
            ));
        }
        if !commit {
            warn!("Resets require --commit, skipping");
            return Ok(Vec::new());
        }

        let mut applied = Vec::new();
        if resets.hints {
            let count = registry.proposals_mut().clear();
            applied.push(format!("Reset hints: {} proposals removed", count));
        }
        if resets.dismisses {
            let count = registry.proposals_mut().reset_dismissals();
            applied.push(format!("Reset dismisses: {} proposals restored", count));
        }
        if resets.email {
            let count = registry.clear_emails();
            applied.push(format!("Reset email: {} records removed", count));
        }
        if resets.tickets {
            let count = registry.clear_tickets();
            applied.push(format!("Reset tickets: {} records removed", count));
        }

        let subject = format!(
            "{}[IX-F] command-line reset",
            self.config.notify.subject_prefix
        );
        let body = applied.join("\n");
        let ticket_ref = self.tickets.create_ticket(&subject, &body).await?;
        registry.record_ticket(TicketRecord {
            subject,
            ticket_ref,
            created_at: now,
        });
        for line in &applied {
            info!("{}", line);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::testing::StaticFeed;
    use crate::registry::{Exchange, LanPrefix};
    use ixf_common::{MemoryMailSink, MemoryTicketSink, Network};
    use ixf_types::ExchangeId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn lan(id: u64, url: &str) -> IxLan {
        let mut lan = IxLan::new(IxLanId::new(id), ExchangeId::new(1));
        lan.name = format!("LAN {}", id);
        lan.member_list_url = Some(url.to_string());
        lan.prefixes.push(LanPrefix {
            prefix: "192.0.2.0/24".parse().unwrap(),
            active: true,
        });
        lan
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.add_exchange(Exchange::new(ExchangeId::new(1), "Example IX"));
        registry.add_ixlan(lan(1, "https://one.example/ixf.json"));
        registry.add_ixlan(lan(2, "https://two.example/ixf.json"));
        let mut disabled = lan(3, "https://three.example/ixf.json");
        disabled.import_enabled = false;
        registry.add_ixlan(disabled);
        let mut network = Network::new(10, Asn::new(64500).unwrap(), "Example Net");
        network.allow_ixp_update = true;
        registry.add_network(network);
        registry
    }

    fn runner(feed: StaticFeed, config: ImporterConfig) -> (BatchRunner, Arc<MemoryTicketSink>) {
        let tickets = Arc::new(MemoryTicketSink::new());
        let runner = BatchRunner::new(
            config,
            Arc::new(feed),
            Arc::new(MemoryMailSink::new()),
            tickets.clone(),
        );
        (runner, tickets)
    }

    #[test]
    fn test_select_lans() {
        let mut registry = registry();
        let (runner, _) = runner(StaticFeed::new(), ImporterConfig::default());

        let all = runner.select(&registry, &BatchOptions::default());
        assert_eq!(all.iter().map(|l| l.id.value()).collect::<Vec<_>>(), vec![1, 2]);

        let named = BatchOptions {
            ixlans: vec![IxLanId::new(2), IxLanId::new(3)],
            ..Default::default()
        };
        assert_eq!(runner.select(&registry, &named).len(), 1);

        registry.add_session(
            IxLanId::new(2),
            Asn::new(64500).unwrap(),
            Some("192.0.2.1".parse().unwrap()),
            None,
            1000,
            false,
            now(),
        );
        let by_asn = BatchOptions {
            asn: Some(Asn::new(64500).unwrap()),
            ..Default::default()
        };
        let selected = runner.select(&registry, &by_asn);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, IxLanId::new(2));
    }

    #[tokio::test]
    async fn test_skip_import_only_caches() {
        let mut registry = registry();
        let feed = StaticFeed::new();
        feed.serve("https://one.example/ixf.json", json!({"member_list": []}));
        let (runner, _) = runner(feed, ImporterConfig::default());

        let options = BatchOptions {
            commit: true,
            skip_import: true,
            ..Default::default()
        };
        let report = runner.run(&mut registry, &options, now()).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert!(registry.attempt(IxLanId::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_resets_need_commit_and_leave_audit_ticket() {
        let mut registry = registry();
        let (runner, tickets) = runner(StaticFeed::new(), ImporterConfig::default());

        let skipped = runner
            .reset(&mut registry, ResetOptions::all(), false, now())
            .await
            .unwrap();
        assert!(skipped.is_empty());
        assert_eq!(tickets.count(), 0);

        let applied = runner
            .reset(&mut registry, ResetOptions::all(), true, now())
            .await
            .unwrap();
        assert_eq!(applied.len(), 4);
        assert_eq!(
            tickets.tickets()[0].subject,
            "[PeeringDB] [IX-F] command-line reset"
        );
        assert_eq!(registry.tickets().len(), 1);
    }

    #[tokio::test]
    async fn test_resets_refused_in_production() {
        let mut registry = registry();
        let config = ImporterConfig {
            release_env: "prod".to_string(),
            ..Default::default()
        };
        let (runner, _) = runner(StaticFeed::new(), config);

        let err = runner
            .reset(&mut registry, ResetOptions::all(), true, now())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
