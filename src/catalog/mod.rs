//! Catalog access
//!
//! The catalog is an append-only, timestamp-ordered log of package changes.
//! This module defines the commit item model and the narrow client contract the
//! collector consumes, plus a JSON-lines file implementation of that contract.

mod item;
mod jsonl;

pub use item::{normalize_version, CommitItem, LeafKind, PackageDetails, PackageIdentity};
pub use jsonl::JsonlCatalog;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by catalog clients
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog could not be reached right now; the caller may poll again
    #[error("Transient catalog failure: {0}")]
    Transient(String),

    /// The catalog returned data that cannot be processed
    #[error("Fatal catalog failure: {0}")]
    Fatal(String),

    #[error("Catalog leaf not found: {0}")]
    LeafNotFound(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Read access to the catalog
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Returns every commit item with `after < commit_timestamp <= up_to`,
    /// ordered by commit timestamp
    async fn fetch_items(
        &self,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> CatalogResult<Vec<CommitItem>>;

    /// Returns the leaf data of a package details item
    async fn fetch_details(&self, item: &CommitItem) -> CatalogResult<PackageDetails>;
}
