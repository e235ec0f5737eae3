//! Error types for IX-F import operations.
//!
//! The variants follow the importer's error taxonomy. Feed-level errors
//! abort the run of one exchange LAN, record-level errors skip one member
//! entry, apply-level errors become a conflict on a proposed change, and
//! everything else is a system-level failure caught by the batch loop.

use std::io;
use thiserror::Error;

/// Result type alias for IX-F import operations.
pub type IxfResult<T> = Result<T, IxfError>;

/// Errors that can occur during IX-F import operations.
#[derive(Debug, Error)]
pub enum IxfError {
    /// The member list could not be downloaded.
    #[error("{message}")]
    FeedUnreachable {
        /// The member list URL.
        url: String,
        /// Error message reported for the LAN.
        message: String,
    },

    /// The member list body is not JSON.
    #[error("{message}")]
    FeedUnparsable {
        /// Error message reported for the LAN.
        message: String,
    },

    /// The member list is JSON but structurally unusable.
    #[error("{message}")]
    FeedInvalid {
        /// Error message reported for the LAN.
        message: String,
    },

    /// No cached copy exists for the URL.
    #[error("IX-F data not locally cached for this resource yet.")]
    CacheMiss {
        /// The member list URL.
        url: String,
    },

    /// The exchange LAN has no active prefix to validate addresses against.
    #[error("No prefixes defined on ixlan")]
    NoActivePrefixes {
        /// The exchange LAN id.
        ixlan: u64,
    },

    /// An address string in a VLAN entry failed to parse.
    #[error("Ip address error '{value}' in vlan_list entry for vlan_id {vlan_id}")]
    InvalidIp {
        /// The offending address string.
        value: String,
        /// The VLAN id of the entry, as published.
        vlan_id: String,
    },

    /// An interface speed could not be parsed.
    #[error("Invalid speed value: {value}")]
    InvalidSpeed {
        /// The offending speed value.
        value: String,
    },

    /// Validation failed while applying a change directly.
    #[error("Could not apply change for {identity}: {message}")]
    ApplyConflict {
        /// Human readable identity of the affected session.
        identity: String,
        /// Validation messages.
        message: String,
    },

    /// Member entries within the LAN's prefixes use more than one VLAN.
    #[error("We found that your IX-F output contained multiple VLANs for the prefixes defined in PeeringDB")]
    MultipleVlans {
        /// The exchange LAN id.
        ixlan: u64,
    },

    /// None of a record's addresses survive the network's protocol support.
    #[error("No suitable ipaddresses when validating against the enabled network protocols")]
    ProtocolsDisabled {
        /// Human readable identity of the record.
        identity: String,
    },

    /// An import log could not be rolled back.
    #[error("Rollback of import log {log} refused: {reason}")]
    RollbackRefused {
        /// The import log id.
        log: u64,
        /// Why the rollback was refused.
        reason: String,
    },

    /// A referenced record does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// The record kind.
        kind: String,
        /// The record id.
        id: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// A mail or ticket sink failed.
    #[error("{sink} sink failed: {message}")]
    Sink {
        /// The sink name.
        sink: String,
        /// Error message.
        message: String,
    },

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl IxfError {
    /// Creates a feed unreachable error.
    pub fn feed_unreachable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FeedUnreachable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a feed unparsable error.
    pub fn feed_unparsable(message: impl Into<String>) -> Self {
        Self::FeedUnparsable {
            message: message.into(),
        }
    }

    /// Creates a structurally invalid feed error.
    pub fn feed_invalid(message: impl Into<String>) -> Self {
        Self::FeedInvalid {
            message: message.into(),
        }
    }

    /// Creates an invalid ip error.
    pub fn invalid_ip(value: impl Into<String>, vlan_id: impl Into<String>) -> Self {
        Self::InvalidIp {
            value: value.into(),
            vlan_id: vlan_id.into(),
        }
    }

    /// Creates an invalid speed error.
    pub fn invalid_speed(value: impl Into<String>) -> Self {
        Self::InvalidSpeed {
            value: value.into(),
        }
    }

    /// Creates an apply conflict error.
    pub fn apply_conflict(identity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApplyConflict {
            identity: identity.into(),
            message: message.into(),
        }
    }

    /// Creates a not found error.
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a sink error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the taxonomy name of this error.
    pub fn kind(&self) -> &'static str {
        match self {
            IxfError::FeedUnreachable { .. } => "feed-unreachable",
            IxfError::FeedUnparsable { .. } => "feed-unparsable",
            IxfError::FeedInvalid { .. } => "feed-invalid",
            IxfError::CacheMiss { .. } => "feed-unreachable",
            IxfError::NoActivePrefixes { .. } => "no-active-prefixes",
            IxfError::InvalidIp { .. } => "invalid-ip",
            IxfError::InvalidSpeed { .. } => "invalid-speed",
            IxfError::ApplyConflict { .. } => "apply-conflict",
            IxfError::MultipleVlans { .. } => "multiple-vlans",
            IxfError::ProtocolsDisabled { .. } => "protocols-disabled",
            IxfError::RollbackRefused { .. } => "rollback-refused",
            IxfError::NotFound { .. } => "not-found",
            IxfError::InvalidConfig { .. } => "config",
            IxfError::Sink { .. } => "sink",
            IxfError::Io(_) => "io",
            IxfError::Serialization(_) => "serialization",
            IxfError::Internal { .. } => "internal",
        }
    }

    /// Returns true if this error aborts the run of one exchange LAN
    /// because of the member list itself.
    pub fn is_feed_level(&self) -> bool {
        matches!(
            self,
            IxfError::FeedUnreachable { .. }
                | IxfError::FeedUnparsable { .. }
                | IxfError::FeedInvalid { .. }
                | IxfError::CacheMiss { .. }
        )
    }

    /// Returns true if this error only affects a single member record.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            IxfError::InvalidIp { .. }
                | IxfError::InvalidSpeed { .. }
                | IxfError::ProtocolsDisabled { .. }
        )
    }
}
