//! In-memory blob storage
//!
//! Blobs are kept in a concurrent map keyed by their `memory://` URL. Operation
//! counters make it easy to assert which storage calls a pipeline issued.

use crate::storage::traits::{
    collect_stream, stream_from_bytes, BlobStorage, ByteStream, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

/// Blob storage held entirely in memory
#[derive(Debug)]
pub struct MemoryStorage {
    base: Url,
    blobs: DashMap<String, Bytes>,
    writes: AtomicU64,
    copies: AtomicU64,
}

impl MemoryStorage {
    /// Creates an empty storage whose locations start with `memory://{name}/`
    pub fn new(name: &str) -> StorageResult<Self> {
        let base = Url::parse(&format!("memory://{}/", name))
            .map_err(|e| StorageError::InvalidLocation(format!("{}: {}", name, e)))?;
        Ok(Self {
            base,
            blobs: DashMap::new(),
            writes: AtomicU64::new(0),
            copies: AtomicU64::new(0),
        })
    }

    /// Stores a blob directly at a relative path
    pub fn insert(&self, path: &str, content: impl Into<Bytes>) -> StorageResult<Url> {
        let location = self.resolve(path)?;
        self.blobs.insert(location.to_string(), content.into());
        Ok(location)
    }

    /// Returns the content stored at a location, if any
    pub fn get(&self, location: &Url) -> Option<Bytes> {
        self.blobs.get(location.as_str()).map(|b| b.value().clone())
    }

    /// Number of blobs currently stored
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of successful `write_stream` calls
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of successful `copy` calls
    pub fn copy_count(&self) -> u64 {
        self.copies.load(Ordering::SeqCst)
    }

    fn check(&self, location: &Url) -> StorageResult<()> {
        if location.scheme() != self.base.scheme() || location.host_str() != self.base.host_str() {
            return Err(StorageError::InvalidLocation(location.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    fn resolve(&self, path: &str) -> StorageResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| StorageError::InvalidLocation(format!("{}: {}", path, e)))
    }

    async fn open_read(&self, location: &Url) -> StorageResult<ByteStream> {
        self.check(location)?;
        self.get(location)
            .map(stream_from_bytes)
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    async fn write_stream(&self, location: &Url, content: ByteStream) -> StorageResult<()> {
        self.check(location)?;
        let content = collect_stream(content).await.map_err(StorageError::Source)?;
        self.blobs.insert(location.to_string(), content);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn copy(&self, source: &Url, destination: &Url) -> StorageResult<()> {
        self.check(source)?;
        self.check(destination)?;
        let content = self
            .get(source)
            .ok_or_else(|| StorageError::NotFound(source.to_string()))?;
        self.blobs.insert(destination.to_string(), content);
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, location: &Url) -> StorageResult<()> {
        self.check(location)?;
        self.blobs.remove(location.as_str());
        Ok(())
    }

    async fn exists(&self, location: &Url) -> StorageResult<bool> {
        self.check(location)?;
        Ok(self.blobs.contains_key(location.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_and_roundtrip() {
        let storage = MemoryStorage::new("icons").unwrap();
        let location = storage.resolve("foo/1.0.0/icon").unwrap();
        assert_eq!(location.as_str(), "memory://icons/foo/1.0.0/icon");

        storage
            .write_stream(&location, stream_from_bytes(&b"data"[..]))
            .await
            .unwrap();
        assert_eq!(storage.get(&location).unwrap(), Bytes::from_static(b"data"));
        assert_eq!(storage.write_count(), 1);
    }

    #[tokio::test]
    async fn test_rejects_foreign_locations() {
        let storage = MemoryStorage::new("icons").unwrap();
        let foreign = Url::parse("memory://other/foo").unwrap();
        assert!(storage.exists(&foreign).await.is_err());
    }
}
