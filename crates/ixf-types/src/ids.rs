//! Record id newtypes.
//!
//! Each persisted record kind gets its own id type so that a session id can
//! never be passed where a LAN id is expected.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                $name(value)
            }

            pub const fn value(&self) -> u64 {
                self.0
            }

            /// Returns the id following this one.
            pub const fn next(&self) -> Self {
                $name(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| ParseError::InvalidId(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

record_id!(
    /// Internet exchange id.
    ExchangeId
);
record_id!(
    /// Exchange LAN id.
    IxLanId
);
record_id!(
    /// Local session (network to exchange LAN connection) id.
    SessionId
);
record_id!(
    /// Proposed change id, stable for the lifetime of the proposal.
    ProposalId
);
record_id!(
    /// Import log id.
    ImportLogId
);
record_id!(
    /// Version id in the session history.
    VersionId
);
