//! Autonomous system numbers.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 32-bit autonomous system number. Zero is reserved and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Asn(u32);

impl Asn {
    /// Creates an ASN, rejecting the reserved value 0.
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if value == 0 {
            return Err(ParseError::InvalidAsn(value.to_string()));
        }
        Ok(Asn(value))
    }

    /// Converts a JSON-style integer, rejecting anything outside 1..=u32::MAX.
    pub fn from_u64(value: u64) -> Result<Self, ParseError> {
        u32::try_from(value)
            .map_err(|_| ParseError::InvalidAsn(value.to_string()))
            .and_then(Asn::new)
    }

    pub const fn value(&self) -> u32 {
        self.0
    }
}

/// Displays as the bare number; use `AS{}` in messages.
impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Asn {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("AS")
            .or_else(|| trimmed.strip_prefix("as"))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .map_err(|_| ParseError::InvalidAsn(s.to_string()))
            .and_then(Asn::new)
    }
}

impl TryFrom<u32> for Asn {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Asn::new(value)
    }
}

impl From<Asn> for u32 {
    fn from(asn: Asn) -> Self {
        asn.0
    }
}
