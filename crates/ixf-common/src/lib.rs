//! Common infrastructure for the IX-F importer.
//!
//! This crate holds everything the reconciliation engine shares with its
//! collaborators:
//!
//! - [`error`]: the [`IxfError`] taxonomy and [`IxfResult`] alias
//! - [`config`]: TOML configuration with defaults and validation
//! - [`sinks`]: mail and ticket sink interfaces plus in-memory implementations
//! - [`directory`]: networks, contacts and the read-only directory lookup
//!
//! # Example
//!
//! ```ignore
//! use ixf_common::{ImporterConfig, IxfResult};
//!
//! fn load() -> IxfResult<ImporterConfig> {
//!     let config = ImporterConfig::load_or_default("/etc/peeringdb/ixf-importer.toml")?;
//!     config.validate()?;
//!     Ok(config)
//! }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod sinks;

// Re-export commonly used items at crate root
pub use config::{
    DataQualityConfig, FeedConfig, ImporterConfig, NotifyConfig, PostmortemConfig,
    ReconcileConfig, StateConfig, DEFAULT_CONFIG_PATH,
};
pub use directory::{Contact, ContactRole, EntityStatus, Network, NetworkDirectory};
pub use error::{IxfError, IxfResult};
pub use sinks::{
    LogMailSink, MailSink, MemoryMailSink, MemoryTicketSink, SentMail, Ticket, TicketRef,
    TicketSink,
};
