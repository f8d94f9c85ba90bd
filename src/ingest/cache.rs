//! Copy-result cache
//!
//! Maps an external icon URL to the outcome of its last ingestion, so that
//! every later package referencing the same URL either copies the already
//! ingested blob or skips a source that is known to fail.

use crate::storage::{collect_stream, stream_from_bytes, BlobStorage, StorageError};
use crate::CollectorError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use url::Url;

/// Last known outcome for one source URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyResult {
    pub source_url: Url,

    /// Where the content was stored; `None` when ingestion failed
    pub storage_url: Option<Url>,
}

impl CopyResult {
    pub fn success(source_url: Url, storage_url: Url) -> Self {
        Self {
            source_url,
            storage_url: Some(storage_url),
        }
    }

    pub fn fail(source_url: Url) -> Self {
        Self {
            source_url,
            storage_url: None,
        }
    }

    pub fn is_copy_succeeded(&self) -> bool {
        self.storage_url.is_some()
    }
}

/// Process-wide cache shared by all ingestion workers
///
/// Individual operations are atomic per key. Workers that need an atomic
/// read-check-then-write across a whole ingestion hold the guard returned by
/// [`CopyResultCache::lock_source`] for that URL.
#[derive(Debug, Default)]
pub struct CopyResultCache {
    entries: DashMap<String, CopyResult>,
    source_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CopyResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached outcome for a source URL
    pub fn get(&self, source_url: &Url) -> Option<CopyResult> {
        self.entries
            .get(source_url.as_str())
            .map(|entry| entry.value().clone())
    }

    /// Records an outcome, replacing any previous one
    pub fn store(&self, source_url: &Url, result: CopyResult) {
        self.entries.insert(source_url.to_string(), result);
    }

    /// Removes the entry for `source_url` if it still points at `storage_url`
    ///
    /// Returns true if an entry was removed.
    pub fn clear(&self, source_url: &Url, storage_url: &Url) -> bool {
        self.entries
            .remove_if(source_url.as_str(), |_, cached| {
                cached.storage_url.as_ref() == Some(storage_url)
            })
            .is_some()
    }

    /// Serializes work on one source URL
    ///
    /// The lock entry is dropped again once no task holds or awaits it.
    pub async fn lock_source(&self, source_url: &Url) -> SourceLock<'_> {
        let key = source_url.to_string();
        let lock = self.source_locks.entry(key.clone()).or_default().value().clone();
        SourceLock {
            guard: Some(lock.lock_owned().await),
            key,
            locks: &self.source_locks,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Loads a cache previously written by [`CopyResultCache::save`]
    ///
    /// A missing document yields an empty cache.
    pub async fn load(storage: &dyn BlobStorage, location: &Url) -> Result<Self, CollectorError> {
        let cache = Self::new();
        let stream = match storage.open_read(location).await {
            Ok(stream) => stream,
            Err(StorageError::NotFound(_)) => {
                tracing::info!("No copy-result cache at {}, starting empty", location);
                return Ok(cache);
            }
            Err(e) => return Err(e.into()),
        };

        let content = collect_stream(stream).await?;
        let snapshot: BTreeMap<String, CopyResult> = serde_json::from_slice(&content)?;
        for (key, value) in snapshot {
            cache.entries.insert(key, value);
        }

        tracing::info!("Loaded {} copy results from {}", cache.len(), location);
        Ok(cache)
    }

    /// Persists the current entries as a JSON document
    pub async fn save(&self, storage: &dyn BlobStorage, location: &Url) -> Result<(), CollectorError> {
        let snapshot: BTreeMap<String, CopyResult> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let content = serde_json::to_vec_pretty(&snapshot)?;
        storage
            .write_stream(location, stream_from_bytes(content))
            .await?;
        tracing::debug!("Saved {} copy results to {}", snapshot.len(), location);
        Ok(())
    }
}

/// Exclusive hold on one source URL, released on drop
pub struct SourceLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
}

impl Drop for SourceLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::time::Duration;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_store_and_get() {
        let cache = CopyResultCache::new();
        let source = url("https://example.com/icon.png");
        assert!(cache.get(&source).is_none());

        cache.store(
            &source,
            CopyResult::success(source.clone(), url("memory://icons/foo/1.0.0/icon")),
        );

        let cached = cache.get(&source).unwrap();
        assert!(cached.is_copy_succeeded());
    }

    #[test]
    fn test_clear_only_matching_location() {
        let cache = CopyResultCache::new();
        let source = url("https://example.com/icon.png");
        let first = url("memory://icons/foo/1.0.0/icon");
        let second = url("memory://icons/foo/2.0.0/icon");

        cache.store(&source, CopyResult::success(source.clone(), second.clone()));

        assert!(!cache.clear(&source, &first));
        assert!(cache.get(&source).is_some());

        assert!(cache.clear(&source, &second));
        assert!(cache.get(&source).is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let storage = MemoryStorage::new("aux").unwrap();
        let location = storage.resolve("icon-copy-results.json").unwrap();

        let cache = CopyResultCache::new();
        let ok = url("https://example.com/ok.png");
        let bad = url("https://example.com/bad.png");
        cache.store(
            &ok,
            CopyResult::success(ok.clone(), url("memory://icons/foo/1.0.0/icon")),
        );
        cache.store(&bad, CopyResult::fail(bad.clone()));
        cache.save(&storage, &location).await.unwrap();

        let loaded = CopyResultCache::load(&storage, &location).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get(&ok).unwrap().is_copy_succeeded());
        assert!(!loaded.get(&bad).unwrap().is_copy_succeeded());
    }

    #[tokio::test]
    async fn test_load_missing_document_is_empty() {
        let storage = MemoryStorage::new("aux").unwrap();
        let location = storage.resolve("missing.json").unwrap();
        let cache = CopyResultCache::load(&storage, &location).await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_lock_source_serializes_same_url() {
        let cache = Arc::new(CopyResultCache::new());
        let source = url("https://example.com/icon.png");

        let guard = cache.lock_source(&source).await;

        let contender = {
            let cache = cache.clone();
            let source = source.clone();
            tokio::spawn(async move {
                let _guard = cache.lock_source(&source).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_released_source_locks_are_dropped() {
        let cache = CopyResultCache::new();
        let first = url("https://example.com/a.png");
        let second = url("https://example.com/b.png");

        let held = cache.lock_source(&first).await;
        drop(cache.lock_source(&second).await);

        assert_eq!(cache.source_locks.len(), 1);
        drop(held);
        assert!(cache.source_locks.is_empty());
    }
}
