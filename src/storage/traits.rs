//! Storage traits and error types
//!
//! This module defines the trait interface for blob storage backends and the
//! error type shared by every storage implementation.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use thiserror::Error;
use url::Url;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Invalid storage location: {0}")]
    InvalidLocation(String),

    /// Reading the content being written failed, not the destination itself
    #[error("Failed to read source content: {0}")]
    Source(#[source] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of content chunks
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Wraps an in-memory buffer as a single-chunk stream
pub fn stream_from_bytes(bytes: impl Into<Bytes>) -> ByteStream {
    let bytes = bytes.into();
    stream::once(async move { Ok(bytes) }).boxed()
}

/// Drains a stream into one buffer
pub async fn collect_stream(mut stream: ByteStream) -> std::io::Result<Bytes> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }
    Ok(buffer.freeze())
}

/// Blob storage addressed by URL
///
/// Implementations must be safe for concurrent use. Writes are all-or-nothing:
/// a failed or abandoned write never leaves partial content at the destination.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Resolves a relative path to the location it is stored at
    fn resolve(&self, path: &str) -> StorageResult<Url>;

    /// Opens a blob for reading
    async fn open_read(&self, location: &Url) -> StorageResult<ByteStream>;

    /// Writes a blob, replacing any existing content
    async fn write_stream(&self, location: &Url, content: ByteStream) -> StorageResult<()>;

    /// Copies an existing blob to another location
    async fn copy(&self, source: &Url, destination: &Url) -> StorageResult<()>;

    /// Deletes a blob; deleting a missing blob succeeds
    async fn delete(&self, location: &Url) -> StorageResult<()>;

    /// Checks if a blob exists
    async fn exists(&self, location: &Url) -> StorageResult<bool>;
}
