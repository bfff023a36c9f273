//! Error types for TaxDesk.
//!
//! Library crates use [`TaxDeskError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all TaxDesk operations.
#[derive(Debug, thiserror::Error)]
pub enum TaxDeskError {
    /// Configuration or catalog loading/validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a portal page or calling an API.
    #[error("network error: {0}")]
    Network(String),

    /// Structured-response or markup parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Completion capability error (transport, API or empty response).
    #[error("completion error: {0}")]
    Completion(String),

    /// Search capability error for a single partition.
    #[error("search error: {0}")]
    Search(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown id, rejected URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TaxDeskError>;

impl TaxDeskError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
