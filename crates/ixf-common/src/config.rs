//! Configuration file support for the IX-F importer
//!
//! Loads and validates importer configuration from TOML files.
//! Default location: /etc/peeringdb/ixf-importer.toml

use crate::error::{IxfError, IxfResult};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/peeringdb/ixf-importer.toml";

/// Feed client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// HTTP timeout for one member list fetch, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Directory for the on-disk feed cache (in-memory only if unset)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Use the last cached copy when a live fetch fails
    #[serde(default = "default_true")]
    pub fallback_to_cache: bool,
}

/// Notification and escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Deliver consolidated mail to exchange contacts
    #[serde(default)]
    pub notify_ix: bool,

    /// Deliver consolidated mail to network contacts
    #[serde(default)]
    pub notify_net: bool,

    /// Open tickets for aged proposals and contact-less networks
    #[serde(default = "default_true")]
    pub tickets_on_conflict: bool,

    /// Age in days after which an unresolved proposal is ticketed
    #[serde(default = "default_days_until_ticket")]
    pub days_until_ticket: i64,

    /// Cooldown between two feed error notices for the same LAN, in hours
    #[serde(default = "default_error_notification_period")]
    pub error_notification_period_hours: i64,

    /// Resend mail that could not be delivered earlier
    #[serde(default)]
    pub resend_failed_emails: bool,

    /// Prefix for every mail and ticket subject
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

/// Change detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Treat a speed difference as a modification
    #[serde(default = "default_true")]
    pub modify_speed: bool,

    /// Treat a route server peering difference as a modification
    #[serde(default = "default_true")]
    pub modify_is_rs_peer: bool,
}

/// Data quality limits applied on direct apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataQualityConfig {
    /// Minimum port speed in Mbit/s
    #[serde(default = "default_min_speed")]
    pub min_speed: u64,

    /// Maximum port speed in Mbit/s
    #[serde(default = "default_max_speed")]
    pub max_speed: u64,
}

/// Postmortem report configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostmortemConfig {
    /// Hard cap on the number of returned entries
    #[serde(default = "default_postmortem_limit")]
    pub limit: usize,
}

/// Registry state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON file holding the registry state
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

/// Complete importer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImporterConfig {
    /// Deployment environment; resets are refused in "prod"
    #[serde(default = "default_release_env")]
    pub release_env: String,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,

    #[serde(default)]
    pub data_quality: DataQualityConfig,

    #[serde(default)]
    pub postmortem: PostmortemConfig,

    #[serde(default)]
    pub state: StateConfig,
}

// Default functions
fn default_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_days_until_ticket() -> i64 {
    14
}

fn default_error_notification_period() -> i64 {
    360
}

fn default_subject_prefix() -> String {
    "[PeeringDB] ".to_string()
}

fn default_min_speed() -> u64 {
    100
}

fn default_max_speed() -> u64 {
    1_000_000
}

fn default_postmortem_limit() -> usize {
    250
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/lib/peeringdb/ixf-state.json")
}

fn default_release_env() -> String {
    "dev".to_string()
}

// Default implementations
impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            cache_dir: None,
            fallback_to_cache: default_true(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            notify_ix: false,
            notify_net: false,
            tickets_on_conflict: default_true(),
            days_until_ticket: default_days_until_ticket(),
            error_notification_period_hours: default_error_notification_period(),
            resend_failed_emails: false,
            subject_prefix: default_subject_prefix(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            modify_speed: default_true(),
            modify_is_rs_peer: default_true(),
        }
    }
}

impl Default for DataQualityConfig {
    fn default() -> Self {
        Self {
            min_speed: default_min_speed(),
            max_speed: default_max_speed(),
        }
    }
}

impl Default for PostmortemConfig {
    fn default() -> Self {
        Self {
            limit: default_postmortem_limit(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            release_env: default_release_env(),
            feed: FeedConfig::default(),
            notify: NotifyConfig::default(),
            reconcile: ReconcileConfig::default(),
            data_quality: DataQualityConfig::default(),
            postmortem: PostmortemConfig::default(),
            state: StateConfig::default(),
        }
    }
}

impl ImporterConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> IxfResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                IxfError::invalid_config(
                    path.display().to_string(),
                    format!("Failed to parse config file: {}", e),
                )
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(IxfError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> IxfResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Get feed fetch timeout as Duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.feed.timeout_secs)
    }

    /// Age after which an unresolved proposal gets a ticket
    pub fn ticket_after(&self) -> ChronoDuration {
        ChronoDuration::days(self.notify.days_until_ticket)
    }

    /// Cooldown between feed error notices for one LAN
    pub fn error_notification_period(&self) -> ChronoDuration {
        ChronoDuration::hours(self.notify.error_notification_period_hours)
    }

    /// Returns true when running in production.
    pub fn is_production(&self) -> bool {
        self.release_env.eq_ignore_ascii_case("prod")
    }

    /// Validate configuration
    pub fn validate(&self) -> IxfResult<()> {
        if self.feed.timeout_secs == 0 {
            return Err(IxfError::invalid_config("feed.timeout_secs", "must be > 0"));
        }

        if self.notify.days_until_ticket < 0 {
            return Err(IxfError::invalid_config(
                "notify.days_until_ticket",
                "must be >= 0",
            ));
        }

        if self.notify.error_notification_period_hours < 0 {
            return Err(IxfError::invalid_config(
                "notify.error_notification_period_hours",
                "must be >= 0",
            ));
        }

        if self.data_quality.min_speed > self.data_quality.max_speed {
            return Err(IxfError::invalid_config(
                "data_quality.min_speed",
                "must not exceed data_quality.max_speed",
            ));
        }

        if self.postmortem.limit == 0 {
            return Err(IxfError::invalid_config("postmortem.limit", "must be > 0"));
        }

        Ok(())
    }
}
