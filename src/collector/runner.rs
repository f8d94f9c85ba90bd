//! Collector loop
//!
//! Each iteration reads the front and back cursors, fetches the commits in
//! (front, back], batches them and dispatches the batches in order. The front
//! cursor moves to a batch's timestamp only after the whole batch succeeded.

use crate::catalog::CatalogClient;
use crate::collector::batching::{create_batches, BatchingStrategy};
use crate::collector::dispatcher::{BatchDispatcher, DispatchSummary};
use crate::collector::ItemProcessor;
use crate::cursor::{MemoryCursor, ReadCursor, WriteCursor};
use crate::ingest::CopyResultCache;
use crate::storage::{BlobStorage, RunStatus, SqliteStore, StorageError};
use crate::{telemetry, CollectorError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Result of one polling iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// At least one batch was processed; poll again right away
    WorkDone,

    /// Nothing new between the cursors
    NoWork,
}

/// Where the copy-result cache is saved after each batch
struct CachePersistence {
    cache: Arc<CopyResultCache>,
    storage: Arc<dyn BlobStorage>,
    location: Url,
}

/// Run rows in the progress database
struct RunHistory {
    store: Arc<Mutex<SqliteStore>>,
    config_hash: String,
}

impl RunHistory {
    fn with_store<T>(
        &self,
        f: impl FnOnce(&mut SqliteStore) -> Result<T, StorageError>,
    ) -> crate::Result<T> {
        let mut store = self
            .store
            .lock()
            .map_err(|_| StorageError::Database("progress store lock poisoned".to_string()))?;
        Ok(f(&mut *store)?)
    }
}

/// Builder for [`Collector`]
pub struct CollectorBuilder {
    front: Arc<dyn WriteCursor>,
    back: Arc<dyn ReadCursor>,
    catalog: Arc<dyn CatalogClient>,
    processor: Arc<dyn ItemProcessor>,
    concurrency: usize,
    strategy: BatchingStrategy,
    poll_interval: Duration,
    cache: Option<CachePersistence>,
    history: Option<RunHistory>,
}

impl CollectorBuilder {
    /// Upper bound of the commit range; unbounded by default
    pub fn back_cursor(mut self, back: Arc<dyn ReadCursor>) -> Self {
        self.back = back;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn batching(mut self, strategy: BatchingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Saves `cache` to `location` after every successful batch
    pub fn persist_cache(
        mut self,
        cache: Arc<CopyResultCache>,
        storage: Arc<dyn BlobStorage>,
        location: Url,
    ) -> Self {
        self.cache = Some(CachePersistence {
            cache,
            storage,
            location,
        });
        self
    }

    /// Records every `run` in the `runs` table of `store`
    pub fn run_history(mut self, store: Arc<Mutex<SqliteStore>>, config_hash: impl Into<String>) -> Self {
        self.history = Some(RunHistory {
            store,
            config_hash: config_hash.into(),
        });
        self
    }

    pub fn build(self) -> Collector {
        Collector {
            front: self.front,
            back: self.back,
            catalog: self.catalog,
            strategy: self.strategy,
            dispatcher: BatchDispatcher::new(self.processor, self.concurrency),
            poll_interval: self.poll_interval,
            cache: self.cache,
            history: self.history,
        }
    }
}

/// Incremental catalog consumer
pub struct Collector {
    front: Arc<dyn WriteCursor>,
    back: Arc<dyn ReadCursor>,
    catalog: Arc<dyn CatalogClient>,
    strategy: BatchingStrategy,
    dispatcher: BatchDispatcher,
    poll_interval: Duration,
    cache: Option<CachePersistence>,
    history: Option<RunHistory>,
}

impl Collector {
    /// Starts building a collector with one worker, single-batch batching and
    /// no back bound
    pub fn builder(
        front: Arc<dyn WriteCursor>,
        catalog: Arc<dyn CatalogClient>,
        processor: Arc<dyn ItemProcessor>,
    ) -> CollectorBuilder {
        CollectorBuilder {
            front,
            back: Arc::new(MemoryCursor::max()),
            catalog,
            processor,
            concurrency: 1,
            strategy: BatchingStrategy::SingleBatch,
            poll_interval: Duration::from_secs(10),
            cache: None,
            history: None,
        }
    }

    /// Runs one polling iteration
    pub async fn run_once(&self, cancel: &CancellationToken) -> crate::Result<IterationOutcome> {
        self.iterate(cancel, None).await
    }

    /// Polls until cancelled, or until the first idle iteration when `once` is set
    ///
    /// Transient catalog errors are retried after the poll interval. Any other
    /// error ends the run; the front cursor then still points at the last
    /// completed batch.
    pub async fn run(&self, cancel: &CancellationToken, once: bool) -> crate::Result<()> {
        let run_id = match &self.history {
            Some(history) => Some(history.with_store(|s| s.create_run(&history.config_hash))?),
            None => None,
        };
        if let Some(id) = run_id {
            tracing::info!("Starting collector run {}", id);
        }

        let result = self.poll(cancel, once, run_id).await;

        let status = match &result {
            Ok(()) if cancel.is_cancelled() => RunStatus::Interrupted,
            Ok(()) => RunStatus::Completed,
            Err(CollectorError::Cancelled) => RunStatus::Interrupted,
            Err(_) => RunStatus::Failed,
        };
        if let (Some(history), Some(id)) = (&self.history, run_id) {
            if let Err(e) = history.with_store(|s| s.finish_run(id, status)) {
                tracing::error!("Failed to finish run {}: {}", id, e);
            }
        }
        tracing::info!("Collector run ended: {}", status.to_db_string());

        match result {
            Err(CollectorError::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn poll(
        &self,
        cancel: &CancellationToken,
        once: bool,
        run_id: Option<i64>,
    ) -> crate::Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            match self.iterate(cancel, run_id).await {
                Ok(IterationOutcome::WorkDone) => continue,
                Ok(IterationOutcome::NoWork) if once => return Ok(()),
                Ok(IterationOutcome::NoWork) => {
                    tracing::debug!("No new commits, sleeping {:?}", self.poll_interval);
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!("Catalog unavailable, retrying in {:?}: {}", self.poll_interval, e);
                }
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn iterate(
        &self,
        cancel: &CancellationToken,
        run_id: Option<i64>,
    ) -> crate::Result<IterationOutcome> {
        let front = self.front.load().await?;
        let back = self.back.load().await?;

        if front >= back {
            tracing::debug!("Front {} is not behind back {}", front, back);
            return Ok(IterationOutcome::NoWork);
        }

        let fetched = self.catalog.fetch_items(front, back).await?;
        let fetched_count = fetched.len();
        let items: Vec<_> = fetched
            .into_iter()
            .filter(|item| item.commit_timestamp > front && item.commit_timestamp <= back)
            .collect();
        if items.len() < fetched_count {
            tracing::warn!(
                "Catalog returned {} commits outside ({}, {}]",
                fetched_count - items.len(),
                front,
                back
            );
        }

        if items.is_empty() {
            return Ok(IterationOutcome::NoWork);
        }

        let item_count = items.len();
        let batches = create_batches(self.strategy, items);
        tracing::info!(
            "Processing {} commits in {} {} batches between {} and {}",
            item_count,
            batches.len(),
            self.strategy,
            front,
            back
        );

        for batch in batches {
            if cancel.is_cancelled() {
                return Err(CollectorError::Cancelled);
            }

            let summary = match self.dispatcher.dispatch(&batch, cancel).await {
                Ok(summary) => summary,
                Err(e) => {
                    tracing::error!(
                        "Batch up to {} failed, front cursor not advanced: {}",
                        batch.commit_timestamp,
                        e
                    );
                    return Err(e);
                }
            };

            self.front.save(batch.commit_timestamp).await?;
            self.save_cache().await?;
            metrics::counter!(telemetry::COLLECTOR_BATCHES).increment(1);
            self.record_progress(run_id, &summary);
            log_summary(&batch.commit_timestamp.to_rfc3339(), &summary);
        }

        Ok(IterationOutcome::WorkDone)
    }

    async fn save_cache(&self) -> crate::Result<()> {
        if let Some(persistence) = &self.cache {
            persistence
                .cache
                .save(persistence.storage.as_ref(), &persistence.location)
                .await?;
        }
        Ok(())
    }

    fn record_progress(&self, run_id: Option<i64>, summary: &DispatchSummary) {
        if let (Some(history), Some(id)) = (&self.history, run_id) {
            let result =
                history.with_store(|s| s.record_progress(id, 1, summary.processed as u64));
            if let Err(e) = result {
                tracing::warn!("Failed to record progress of run {}: {}", id, e);
            }
        }
    }
}

fn log_summary(timestamp: &str, summary: &DispatchSummary) {
    tracing::info!(
        "Batch up to {} done: {} items ({} ingested, {} copied, {} unchanged, {} deleted, {} skipped, {} failed)",
        timestamp,
        summary.processed,
        summary.ingested,
        summary.copied,
        summary.unchanged,
        summary.deleted,
        summary.skipped,
        summary.failed
    );
}
