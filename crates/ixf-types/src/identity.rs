//! The identity of a peering session as seen by the IX-F importer.

use crate::{Asn, IpProtocol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// `(asn, ipv4, ipv6)` tuple identifying one member connection on an
/// exchange LAN. Either address may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IxfId {
    pub asn: Asn,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
}

impl IxfId {
    pub const fn new(asn: Asn, ipv4: Option<Ipv4Addr>, ipv6: Option<Ipv6Addr>) -> Self {
        IxfId { asn, ipv4, ipv6 }
    }

    /// Returns true if neither address is set.
    pub const fn is_empty(&self) -> bool {
        self.ipv4.is_none() && self.ipv6.is_none()
    }

    /// Drops the addresses of protocols the owning network does not run.
    pub fn restrict(&self, ipv4_support: bool, ipv6_support: bool) -> Self {
        IxfId {
            asn: self.asn,
            ipv4: self.ipv4.filter(|_| ipv4_support),
            ipv6: self.ipv6.filter(|_| ipv6_support),
        }
    }

    /// Returns true if both identities belong to the same ASN and have at
    /// least one address in common.
    pub fn shares_address(&self, other: &IxfId) -> bool {
        if self.asn != other.asn {
            return false;
        }
        let v4 = matches!((self.ipv4, other.ipv4), (Some(a), Some(b)) if a == b);
        let v6 = matches!((self.ipv6, other.ipv6), (Some(a), Some(b)) if a == b);
        v4 || v6
    }

    /// Returns the present addresses, IPv4 first.
    pub fn addresses(&self) -> impl Iterator<Item = IpAddr> {
        self.ipv4
            .map(IpAddr::V4)
            .into_iter()
            .chain(self.ipv6.map(IpAddr::V6))
    }

    pub fn address(&self, protocol: IpProtocol) -> Option<IpAddr> {
        match protocol {
            IpProtocol::Ipv4 => self.ipv4.map(IpAddr::V4),
            IpProtocol::Ipv6 => self.ipv6.map(IpAddr::V6),
        }
    }
}

impl fmt::Display for IxfId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.asn)?;
        match self.ipv4 {
            Some(ip) => write!(f, " - {}", ip)?,
            None => write!(f, " - IPv4 not set")?,
        }
        match self.ipv6 {
            Some(ip) => write!(f, " - {}", ip),
            None => write!(f, " - IPv6 not set"),
        }
    }
}
