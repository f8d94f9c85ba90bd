//! Catalog-Collector: incremental catalog consumption with icon ingestion
//!
//! This crate tails an append-only, timestamp-ordered package catalog between a
//! front and a back cursor, partitions the new commits into batches, and drives
//! every batch through a concurrent icon ingestion pipeline backed by a
//! copy-result cache. The front cursor only moves after a batch fully succeeds,
//! so any interrupted range is replayed on the next run.

pub mod archive;
pub mod catalog;
pub mod collector;
pub mod config;
pub mod cursor;
pub mod ingest;
pub mod retry;
pub mod storage;
pub mod telemetry;

use thiserror::Error;

/// Main error type for collector operations
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Cursor error: {0}")]
    Cursor(#[from] cursor::CursorError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error for {package}: {message}")]
    Archive { package: String, message: String },

    #[error("Failed to process {package}: {message}")]
    Item { package: String, message: String },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CollectorError {
    /// Returns true if this error only aborted the current iteration and the
    /// same commit range can be polled again after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Catalog(e) if e.is_transient())
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid timestamp in config: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, CollectorError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{CommitItem, LeafKind, PackageDetails, PackageIdentity};
pub use collector::{BatchingStrategy, Collector, CommitBatch, IterationOutcome};
pub use config::Config;
pub use ingest::{CopyResultCache, IconPipeline, IngestionOutcome};
