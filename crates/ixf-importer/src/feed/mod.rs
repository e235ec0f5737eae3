//! Member list retrieval and interpretation.
//!
//! - [`client`]: HTTP fetch with timeout and cache fallback
//! - [`cache`]: URL keyed document cache
//! - [`sanitize`]: repair of split dual-stack VLAN entries
//! - [`parse`]: flattening into [`RemoteRecord`]s

pub mod cache;
pub mod client;
pub mod parse;
pub mod sanitize;
pub mod schema;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::FeedCache;
pub use client::{FeedSource, HttpFeedClient, MISSING_URL};
pub use parse::{parse, ParsedFeed, RemoteRecord, SkippedEntry};
pub use sanitize::{sanitize, Sanitized};
