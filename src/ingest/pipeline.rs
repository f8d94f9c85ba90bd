//! Icon ingestion pipeline
//!
//! Processes a single catalog commit:
//! - Deletes the stored icon of a deleted package
//! - Copies an embedded icon out of the package archive
//! - Fetches an external icon, following HTTP 308 by hand, and records the
//!   outcome in the copy-result cache

use crate::archive::{ArchiveReader, ZipArchiveReader};
use crate::catalog::{CatalogClient, CommitItem, LeafKind, PackageDetails};
use crate::collector::{ItemOutcome, ItemProcessor};
use crate::ingest::cache::{CopyResult, CopyResultCache};
use crate::ingest::fetcher::{classify_status, ExternalFetcher, ResponseClass};
use crate::ingest::IngestSettings;
use crate::retry::{retry_incremental, retry_on_error};
use crate::storage::{collect_stream, stream_from_bytes, BlobStorage, StorageError};
use crate::{telemetry, CollectorError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Result of one ingestion of an external source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// The content now lives at this destination
    Success(Url),

    /// Another attempt may succeed
    FailRetryable,

    /// Further attempts are pointless
    FailTerminal,
}

impl IngestionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Returns true for absolute `http`/`https` URLs
pub fn is_valid_icon_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.has_host()
}

/// Per-item icon processor
pub struct IconPipeline {
    catalog: Arc<dyn CatalogClient>,
    destination: Arc<dyn BlobStorage>,
    packages: Arc<dyn BlobStorage>,
    fetcher: Arc<dyn ExternalFetcher>,
    archive: Arc<dyn ArchiveReader>,
    cache: Arc<CopyResultCache>,
    settings: IngestSettings,
}

impl IconPipeline {
    /// Creates a pipeline that reads package archives as zip files
    ///
    /// # Arguments
    ///
    /// * `catalog` - Source of package details for each commit
    /// * `destination` - Storage receiving the icons
    /// * `packages` - Storage holding the package archives
    /// * `fetcher` - HTTP access to external icon hosts
    /// * `cache` - Copy-result cache shared by all workers
    /// * `settings` - Attempt budgets and redirect bound
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        destination: Arc<dyn BlobStorage>,
        packages: Arc<dyn BlobStorage>,
        fetcher: Arc<dyn ExternalFetcher>,
        cache: Arc<CopyResultCache>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            catalog,
            destination,
            packages,
            fetcher,
            archive: Arc::new(ZipArchiveReader),
            cache,
            settings,
        }
    }

    /// Replaces the archive reader
    pub fn with_archive_reader(mut self, archive: Arc<dyn ArchiveReader>) -> Self {
        self.archive = archive;
        self
    }

    pub fn cache(&self) -> &Arc<CopyResultCache> {
        &self.cache
    }

    /// Handles a package details commit
    pub async fn process_details(
        &self,
        item: &CommitItem,
        details: &PackageDetails,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome> {
        let icon_url = details.icon_url.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let icon_file = details.icon_file.as_deref().map(str::trim).filter(|s| !s.is_empty());

        match (icon_url, icon_file) {
            (_, Some(icon_file)) => self.process_embedded_icon(item, icon_file, cancel).await,
            (Some(icon_url), None) => {
                tracing::info!(
                    icon_url,
                    package_id = %item.identity.id,
                    version = %item.identity.version,
                    "Found external icon url"
                );
                match Url::parse(icon_url) {
                    Ok(source) if is_valid_icon_url(&source) => {
                        self.process_external_icon(item, source, cancel).await
                    }
                    _ => {
                        tracing::info!(
                            icon_url,
                            package_id = %item.identity.id,
                            version = %item.identity.version,
                            reason = "not an absolute http(s) url",
                            "Skipping external icon"
                        );
                        Ok(ItemOutcome::Skipped)
                    }
                }
            }
            (None, None) => {
                tracing::debug!("{} has no icon", item.identity);
                Ok(ItemOutcome::Skipped)
            }
        }
    }

    /// Deletes the stored icon of a deleted package
    ///
    /// Cache entries pointing at the deleted blob are left alone; the next
    /// copy from them fails and falls back to a fresh ingestion.
    pub async fn process_delete(
        &self,
        item: &CommitItem,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome> {
        let destination = self.destination.resolve(&item.identity.icon_path())?;
        let storage = &self.destination;
        let target = &destination;

        retry_on_error(
            self.settings.copy_policy,
            move |_| storage.delete(target),
            cancel,
        )
        .await?;

        tracing::info!("Deleted icon of {} at {}", item.identity, destination);
        Ok(ItemOutcome::Deleted)
    }

    async fn process_external_icon(
        &self,
        item: &CommitItem,
        source: Url,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome> {
        let started = Instant::now();
        let destination = self.destination.resolve(&item.identity.icon_path())?;

        let _guard = self.cache.lock_source(&source).await;

        if let Some(cached) = self.cache.get(&source) {
            match cached.storage_url {
                Some(stored) if stored == destination => {
                    if self.destination.exists(&destination).await? {
                        tracing::debug!("Icon of {} is already at {}", item.identity, destination);
                        return Ok(ItemOutcome::Unchanged);
                    }
                    tracing::info!(
                        icon_url = %source,
                        storage_url = %stored,
                        "Cached icon is gone, ingesting again"
                    );
                    self.cache.clear(&source, &stored);
                }
                Some(stored) => {
                    tracing::info!(
                        "Copying previously ingested {} from {} to {}",
                        source,
                        stored,
                        destination
                    );
                    let storage = &self.destination;
                    let (from, to) = (&stored, &destination);
                    match retry_on_error(
                        self.settings.copy_policy,
                        move |_| storage.copy(from, to),
                        cancel,
                    )
                    .await
                    {
                        Ok(()) => {
                            record_processing_time("external", started);
                            return Ok(ItemOutcome::Copied);
                        }
                        Err(e) => {
                            if cancel.is_cancelled() {
                                return Err(CollectorError::Cancelled);
                            }
                            tracing::warn!(
                                icon_url = %source,
                                storage_url = %stored,
                                error = %e,
                                "Copy of cached icon failed, ingesting again"
                            );
                            self.cache.clear(&source, &stored);
                        }
                    }
                }
                None => {
                    tracing::info!(
                        icon_url = %source,
                        package_id = %item.identity.id,
                        version = %item.identity.version,
                        "Previous ingestion of this url failed, skipping"
                    );
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        let (from, to) = (&source, &destination);
        let outcome = retry_incremental(
            self.settings.ingest_policy,
            move |_| self.try_ingest(from, to),
            |_: &CollectorError| false,
            |result: &IngestionOutcome| *result == IngestionOutcome::FailRetryable,
            cancel,
        )
        .await?;

        if !outcome.is_success() && cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        record_processing_time("external", started);
        match outcome {
            IngestionOutcome::Success(stored) => {
                self.cache
                    .store(&source, CopyResult::success(source.clone(), stored));
                Ok(ItemOutcome::Ingested)
            }
            failed => {
                metrics::counter!(telemetry::ICON_INGESTION_FAILURES).increment(1);
                tracing::warn!(
                    icon_url = %source,
                    package_id = %item.identity.id,
                    version = %item.identity.version,
                    reason = ?failed,
                    "Failed to ingest icon"
                );
                self.cache.store(&source, CopyResult::fail(source.clone()));
                Ok(ItemOutcome::Failed)
            }
        }
    }

    /// One ingestion attempt: GET the source, following 308 by hand
    async fn try_ingest(&self, source: &Url, destination: &Url) -> crate::Result<IngestionOutcome> {
        let mut current = source.clone();
        let mut hops = 0u32;

        loop {
            let response = match self.fetcher.get(&current).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::info!(icon_url = %current, error = %e, "Request failed");
                    return Ok(if e.is_retryable() {
                        IngestionOutcome::FailRetryable
                    } else {
                        IngestionOutcome::FailTerminal
                    });
                }
            };

            match classify_status(response.status) {
                ResponseClass::Success => {
                    return match self.destination.write_stream(destination, response.body).await {
                        Ok(()) => {
                            tracing::info!("Stored {} at {}", source, destination);
                            Ok(IngestionOutcome::Success(destination.clone()))
                        }
                        Err(StorageError::Source(e)) => {
                            tracing::warn!(icon_url = %current, error = %e, "Reading response body failed");
                            Ok(IngestionOutcome::FailRetryable)
                        }
                        Err(e) => Err(e.into()),
                    };
                }
                ResponseClass::ManualRedirect => {
                    let next = response
                        .location
                        .as_deref()
                        .and_then(|location| current.join(location).ok());
                    let next = match next {
                        Some(next) if next != current && is_valid_icon_url(&next) => next,
                        _ => {
                            tracing::info!(
                                icon_url = %current,
                                location = ?response.location,
                                "Unusable redirect location"
                            );
                            return Ok(IngestionOutcome::FailTerminal);
                        }
                    };
                    if hops >= self.settings.max_redirects {
                        tracing::info!(icon_url = %source, hops, "Too many redirects");
                        return Ok(IngestionOutcome::FailTerminal);
                    }
                    hops += 1;
                    tracing::debug!("Following 308 from {} to {}", current, next);
                    current = next;
                }
                ResponseClass::Terminal => {
                    tracing::info!(icon_url = %current, status = response.status, "Source responded with a terminal status");
                    return Ok(IngestionOutcome::FailTerminal);
                }
                ResponseClass::Retryable => {
                    tracing::warn!(icon_url = %current, status = response.status, "Unexpected response code");
                    return Ok(IngestionOutcome::FailRetryable);
                }
            }
        }
    }

    async fn process_embedded_icon(
        &self,
        item: &CommitItem,
        icon_file: &str,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome> {
        let started = Instant::now();
        let package = self.packages.resolve(&item.identity.package_file_name())?;
        let destination = self.destination.resolve(&item.identity.icon_path())?;

        let (archive, target) = (&package, &destination);
        let copied = retry_incremental(
            self.settings.copy_policy,
            move |_| self.copy_embedded_icon(archive, icon_file, target),
            |e: &CollectorError| {
                let retry = !is_terminal_embedded_error(e);
                if retry {
                    tracing::warn!("Attempt failed: {}", e);
                }
                retry
            },
            |_: &bool| false,
            cancel,
        )
        .await;

        match copied {
            Ok(true) => {
                record_processing_time("embedded", started);
                tracing::info!("Copied embedded icon {} of {}", icon_file, item.identity);
                Ok(ItemOutcome::Ingested)
            }
            Ok(false) => {
                tracing::info!(
                    package_id = %item.identity.id,
                    version = %item.identity.version,
                    icon_file,
                    reason = "entry not found in package",
                    "Skipping embedded icon"
                );
                Ok(ItemOutcome::Skipped)
            }
            Err(e) if is_terminal_embedded_error(&e) => {
                metrics::counter!(telemetry::ICON_INGESTION_FAILURES).increment(1);
                tracing::warn!(
                    package_id = %item.identity.id,
                    version = %item.identity.version,
                    icon_file,
                    reason = %e,
                    "Failed to copy embedded icon"
                );
                Ok(ItemOutcome::Failed)
            }
            Err(e) => Err(e),
        }
    }

    /// Copies an archive entry to the destination; false if the entry is missing
    async fn copy_embedded_icon(
        &self,
        package: &Url,
        icon_file: &str,
        destination: &Url,
    ) -> crate::Result<bool> {
        let content = collect_stream(self.packages.open_read(package).await?).await?;

        let reader = Arc::clone(&self.archive);
        let entry_name = icon_file.to_string();
        let entry = tokio::task::spawn_blocking(move || reader.open_entry(&content, &entry_name))
            .await
            .map_err(|e| CollectorError::Worker(e.to_string()))?
            .map_err(|e| CollectorError::Archive {
                package: package.to_string(),
                message: e.to_string(),
            })?;

        match entry {
            Some(icon) => {
                self.destination
                    .write_stream(destination, stream_from_bytes(icon))
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Missing or unreadable package archives are not worth retrying
fn is_terminal_embedded_error(e: &CollectorError) -> bool {
    matches!(
        e,
        CollectorError::Storage(StorageError::NotFound(_)) | CollectorError::Archive { .. }
    )
}

fn record_processing_time(kind: &'static str, started: Instant) {
    metrics::histogram!(telemetry::ICON_PROCESSING_SECONDS, "kind" => kind)
        .record(started.elapsed().as_secs_f64());
}

#[async_trait]
impl ItemProcessor for IconPipeline {
    async fn process(
        &self,
        item: &CommitItem,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome> {
        match item.kind {
            LeafKind::PackageDelete => self.process_delete(item, cancel).await,
            LeafKind::PackageDetails => {
                let details = self.catalog.fetch_details(item).await?;
                self.process_details(item, &details, cancel).await
            }
            LeafKind::Other => Ok(ItemOutcome::Skipped),
        }
    }
}
