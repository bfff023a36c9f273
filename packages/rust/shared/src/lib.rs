//! Shared types, error model, configuration and catalogs for TaxDesk.
//!
//! This crate is the foundation depended on by all other TaxDesk crates.
//! It provides:
//! - [`TaxDeskError`], the unified error type
//! - Domain types ([`QuestionIntent`], [`DiscoveredDocument`], [`PortalState`], ...)
//! - Configuration ([`AppConfig`], [`RetrievalOptions`], config loading)
//! - The [`CatalogStore`] registry of portals and partitions
//! - Capability traits implemented by storage, crawler and completion adapters

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod error;
pub mod text;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capabilities::{CompletionBackend, PageFetcher, PortalStateStore, SearchBackend};
pub use catalog::{CatalogStore, Catalogs};
pub use config::{
    AllowedDomain, AppConfig, CatalogConfig, DEFAULT_RETRIEVAL_TIMEOUT_MS, FetchConfig,
    MAX_PARTITIONS_PER_QUERY, OpenRouterConfig, RetrievalConfig, RetrievalOptions, StorageConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, TaxDeskError};
pub use types::{
    ClassificationResult, ClassificationStrategy, DiscoveredDocument, DocType, Family, Natureza,
    PartitionDescriptor, PortalDefinition, PortalState, PortalType, QuestionIntent, Trail,
};
