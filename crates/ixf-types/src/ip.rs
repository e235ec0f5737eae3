//! IP prefix type with containment checks.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// IP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpProtocol {
    Ipv4,
    Ipv6,
}

impl IpProtocol {
    /// Returns the protocol of the given address.
    pub const fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpProtocol::Ipv4,
            IpAddr::V6(_) => IpProtocol::Ipv6,
        }
    }

    /// Returns the version number (4 or 6).
    pub const fn version(&self) -> u8 {
        match self {
            IpProtocol::Ipv4 => 4,
            IpProtocol::Ipv6 => 6,
        }
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Ipv4 => write!(f, "IPv4"),
            IpProtocol::Ipv6 => write!(f, "IPv6"),
        }
    }
}

/// An IP prefix in CIDR notation (e.g., 192.0.2.0/24 or 2001:db8::/64).
///
/// The network address is stored with host bits cleared, so
/// `192.0.2.7/24` and `192.0.2.0/24` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpPrefix {
    network: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Creates a new IP prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix length is invalid for the address type
    /// (>32 for IPv4, >128 for IPv6).
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, ParseError> {
        let max_len = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        if prefix_len > max_len {
            return Err(ParseError::InvalidIpPrefix(format!(
                "prefix length {} exceeds maximum {} for address type",
                prefix_len, max_len
            )));
        }

        let network = match address {
            IpAddr::V4(v4) => IpAddr::V4((u32::from(v4) & v4_mask(prefix_len)).into()),
            IpAddr::V6(v6) => IpAddr::V6((u128::from(v6) & v6_mask(prefix_len)).into()),
        };

        Ok(IpPrefix {
            network,
            prefix_len,
        })
    }

    /// Returns the network address of this prefix.
    pub const fn network(&self) -> &IpAddr {
        &self.network
    }

    /// Returns the prefix length in bits.
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub const fn protocol(&self) -> IpProtocol {
        IpProtocol::of(&self.network)
    }

    /// Returns true if `addr` lies inside this prefix. Addresses of the
    /// other protocol are never contained.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                u32::from(*a) & v4_mask(self.prefix_len) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                u128::from(*a) & v6_mask(self.prefix_len) == u128::from(net)
            }
            _ => false,
        }
    }
}

fn v4_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len))
    }
}

fn v6_mask(len: u8) -> u128 {
    if len == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(len))
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_str, len_str) = s
            .trim()
            .rsplit_once('/')
            .ok_or_else(|| ParseError::InvalidIpPrefix(s.to_string()))?;

        let address: IpAddr = addr_str
            .parse()
            .map_err(|_| ParseError::InvalidIpAddress(addr_str.to_string()))?;
        let prefix_len: u8 = len_str
            .parse()
            .map_err(|_| ParseError::InvalidIpPrefix(s.to_string()))?;

        IpPrefix::new(address, prefix_len)
    }
}

impl TryFrom<String> for IpPrefix {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpPrefix> for String {
    fn from(prefix: IpPrefix) -> Self {
        prefix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ip_prefix_parse() {
        let prefix: IpPrefix = "192.0.2.0/24".parse().unwrap();
        assert_eq!(prefix.protocol(), IpProtocol::Ipv4);
        assert_eq!(prefix.prefix_len(), 24);

        let v6_prefix: IpPrefix = "2001:db8::/64".parse().unwrap();
        assert_eq!(v6_prefix.protocol(), IpProtocol::Ipv6);
        assert_eq!(v6_prefix.prefix_len(), 64);
    }

    #[test]
    fn test_host_bits_are_cleared() {
        let prefix: IpPrefix = "192.0.2.77/24".parse().unwrap();
        assert_eq!(prefix.to_string(), "192.0.2.0/24");
    }

    #[test]
    fn test_contains() {
        let prefix: IpPrefix = "192.0.2.0/24".parse().unwrap();
        assert!(prefix.contains(&"192.0.2.1".parse().unwrap()));
        assert!(!prefix.contains(&"192.0.3.1".parse().unwrap()));
        assert!(!prefix.contains(&"2001:db8::1".parse().unwrap()));

        let v6: IpPrefix = "2001:db8::/64".parse().unwrap();
        assert!(v6.contains(&"2001:db8::a".parse().unwrap()));
        assert!(!v6.contains(&"2001:db9::a".parse().unwrap()));

        let everything: IpPrefix = "0.0.0.0/0".parse().unwrap();
        assert!(everything.contains(&"203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_invalid_prefix_length() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("2001:db8::/129".parse::<IpPrefix>().is_err());
        assert!("10.0.0.0".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let prefix: IpPrefix = "2001:db8::/64".parse().unwrap();
        let json = serde_json::to_string(&prefix).unwrap();
        assert_eq!(json, "\"2001:db8::/64\"");
        assert_eq!(serde_json::from_str::<IpPrefix>(&json).unwrap(), prefix);
    }
}
