//! Portal watching: fetch listing pages, turn their links into documents and
//! report the ones not seen before.
//!
//! This crate provides:
//! - [`policy`]: allowed-domain rules and SSRF protection
//! - [`fetch`]: the `reqwest`-backed [`HttpFetcher`]
//! - [`listing`]: listing-page parsing and fingerprints
//! - [`metadata`]: keyword-based enrichment (domain, natureza, assuntos)
//! - [`engine`]: the sequential [`PortalWatcher`]

pub mod engine;
pub mod fetch;
pub mod listing;
pub mod metadata;
pub mod policy;

pub use engine::{PortalWatcher, ScanReport};
pub use fetch::HttpFetcher;
pub use listing::{extract_published_at, fingerprint, parse_listing};
pub use metadata::enrich;
pub use policy::{DomainPolicy, is_ssrf_target};
