//! IX-F member list reconciliation engine.
//!
//! Fetches an exchange's IX-F member list, reconciles it against the
//! registry's peering sessions and either applies the differences, keeps
//! them as proposals for the network to review, or escalates them.
//!
//! - [`feed`]: fetch, cache, sanitize and parse member lists
//! - [`registry`]: in-process registry state with session history
//! - [`reconcile`]: the per-LAN reconciler
//! - [`store`]: live proposed changes
//! - [`notify`]: consolidated notifications and ticket escalation
//! - [`import_log`]: audit trail and rollback
//! - [`postmortem`]: import history of one network
//! - [`batch`]: the batch loop driven by the command line
//!
//! # Example
//!
//! ```ignore
//! use ixf_importer::{Reconciler, Registry, UpdateOptions};
//!
//! let mut registry = Registry::load("/var/lib/peeringdb/ixf-state.json")?;
//! let outcome = Reconciler::new(&config, chrono::Utc::now()).update(
//!     &mut registry,
//!     ixlan_id,
//!     Ok(member_list),
//!     UpdateOptions { commit: false, asn: None },
//! )?;
//! println!("{}", serde_json::to_string_pretty(&outcome.log)?);
//! ```

pub mod batch;
pub mod feed;
pub mod import_log;
pub mod notify;
pub mod postmortem;
pub mod proposal;
pub mod reconcile;
pub mod registry;
pub mod run_log;
pub mod store;

pub use batch::{BatchOptions, BatchReport, BatchRunner, LanFailure, ResetOptions};
pub use feed::{FeedCache, FeedSource, HttpFeedClient, MISSING_URL};
pub use import_log::{rollback, rollback_status, ImportLog, ImportLogEntry, RollbackStatus};
pub use notify::{EscalationNotifier, Notification, NotificationKind, NotifyReport};
pub use postmortem::{PostMortem, PostMortemEntry};
pub use proposal::{Action, ProposalKey, ProposedChange};
pub use reconcile::{ImportOutcome, Reconciler, UpdateOptions};
pub use registry::{Exchange, IxLan, LanPrefix, Registry, Session, SessionStatus};
pub use run_log::{PeerInfo, RunLog, RunLogEntry};
pub use store::{NetworkProposals, ProposalStore, UpsertOutcome};
