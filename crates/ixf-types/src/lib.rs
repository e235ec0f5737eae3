//! Common types for the peering registry and the IX-F importer.
//!
//! This crate provides type-safe representations of the primitives shared
//! by the reconciliation engine:
//!
//! - [`Asn`]: autonomous system numbers
//! - [`IxfId`]: the `(asn, ipv4, ipv6)` identity of a peering session
//! - [`IpPrefix`]: exchange LAN prefixes (CIDR notation)
//! - [`IpProtocol`]: IPv4 / IPv6 discriminator
//! - Record id newtypes for exchanges, LANs, sessions, proposals and logs

mod asn;
mod identity;
mod ids;
mod ip;

pub use asn::Asn;
pub use identity::IxfId;
pub use ids::{ExchangeId, ImportLogId, IxLanId, ProposalId, SessionId, VersionId};
pub use ip::{IpPrefix, IpProtocol};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid ASN: {0}")]
    InvalidAsn(String),

    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),

    #[error("invalid IP prefix format: {0}")]
    InvalidIpPrefix(String),

    #[error("invalid record id: {0}")]
    InvalidId(String),
}
