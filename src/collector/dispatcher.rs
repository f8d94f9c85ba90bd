//! Batch dispatcher
//!
//! Runs the items of one batch through an [`ItemProcessor`] on a bounded pool
//! of tokio tasks sharing a lock-free work queue.

use crate::catalog::{CommitItem, PackageIdentity};
use crate::collector::batching::CommitBatch;
use crate::collector::{ItemOutcome, ItemProcessor};
use crate::{telemetry, CollectorError};
use crossbeam_queue::SegQueue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome counts of one dispatched batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub processed: usize,
    pub ingested: usize,
    pub copied: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: ItemOutcome) {
        self.processed += 1;
        match outcome {
            ItemOutcome::Ingested => self.ingested += 1,
            ItemOutcome::Copied => self.copied += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::Skipped => self.skipped += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    /// Adds the counts of another summary
    pub fn merge(&mut self, other: DispatchSummary) {
        self.processed += other.processed;
        self.ingested += other.ingested;
        self.copied += other.copied;
        self.unchanged += other.unchanged;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Bounded-concurrency worker pool for one batch at a time
pub struct BatchDispatcher {
    processor: Arc<dyn ItemProcessor>,
    concurrency: usize,
}

impl BatchDispatcher {
    pub fn new(processor: Arc<dyn ItemProcessor>, concurrency: usize) -> Self {
        Self {
            processor,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes every item of `batch`
    ///
    /// Returns once all workers have exited. The first error cancels the
    /// remaining workers and is returned; in-flight items are abandoned.
    pub async fn dispatch(
        &self,
        batch: &CommitBatch,
        cancel: &CancellationToken,
    ) -> crate::Result<DispatchSummary> {
        let items = latest_per_identity(&batch.items);
        if items.is_empty() {
            return Ok(DispatchSummary::default());
        }

        let queue = Arc::new(SegQueue::new());
        for item in items {
            queue.push(item);
        }

        let worker_count = self.concurrency.min(queue.len());
        tracing::debug!(
            "Dispatching {} items to {} workers",
            queue.len(),
            worker_count
        );

        let workers_cancel = cancel.child_token();
        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&self.processor),
                workers_cancel.clone(),
            ));
        }

        let mut summary = DispatchSummary::default();
        let mut first_error: Option<CollectorError> = None;

        while let Some(joined) = workers.join_next().await {
            let error = match joined {
                Ok(Ok(partial)) => {
                    summary.merge(partial);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(join_error) => CollectorError::Worker(join_error.to_string()),
            };

            workers_cancel.cancel();
            // Keep the root cause rather than the cancellations it triggered
            match &first_error {
                None => first_error = Some(error),
                Some(CollectorError::Cancelled) if !matches!(error, CollectorError::Cancelled) => {
                    first_error = Some(error)
                }
                Some(_) => {}
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<SegQueue<CommitItem>>,
    processor: Arc<dyn ItemProcessor>,
    cancel: CancellationToken,
) -> crate::Result<DispatchSummary> {
    let mut summary = DispatchSummary::default();

    while let Some(item) = queue.pop() {
        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Worker {} abandoned {}", worker_id, item.identity);
                return Err(CollectorError::Cancelled);
            }
            result = processor.process(&item, &cancel) => result,
        };

        match result {
            Ok(outcome) => {
                tracing::trace!("Worker {} processed {}: {:?}", worker_id, item.identity, outcome);
                metrics::counter!(telemetry::COLLECTOR_ITEMS).increment(1);
                summary.record(outcome);
            }
            Err(e) => {
                tracing::error!("Failed to process {} ({}): {}", item.identity, item.uri, e);
                return Err(e);
            }
        }
    }

    Ok(summary)
}

/// Keeps only the latest commit of each package identity
///
/// Items keep their relative order; ties on timestamp go to the later item.
fn latest_per_identity(items: &[CommitItem]) -> Vec<CommitItem> {
    let mut latest: HashMap<&PackageIdentity, usize> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let keep = match latest.get(&item.identity) {
            Some(&previous) => items[previous].commit_timestamp <= item.commit_timestamp,
            None => true,
        };
        if keep {
            latest.insert(&item.identity, index);
        }
    }

    let dropped = items.len() - latest.len();
    if dropped > 0 {
        tracing::debug!("Dropped {} superseded commits from batch", dropped);
    }

    let mut keep: Vec<usize> = latest.into_values().collect();
    keep.sort_unstable();
    keep.into_iter().map(|index| items[index].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LeafKind;
    use crate::collector::batching::{create_batches, BatchingStrategy};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn item(id: &str, version: &str, second: u32) -> CommitItem {
        CommitItem {
            identity: PackageIdentity::new(id, version),
            commit_timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, second).unwrap(),
            uri: format!("{}/{}/{}", id, version, second),
            kind: LeafKind::PackageDetails,
        }
    }

    fn batch(items: Vec<CommitItem>) -> CommitBatch {
        create_batches(BatchingStrategy::SingleBatch, items)
            .pop()
            .unwrap()
    }

    /// Records processed items and tracks peak concurrency
    #[derive(Default)]
    struct RecordingProcessor {
        seen: Mutex<Vec<String>>,
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_id: Option<String>,
        terminal_id: Option<String>,
    }

    #[async_trait]
    impl ItemProcessor for RecordingProcessor {
        async fn process(
            &self,
            item: &CommitItem,
            _cancel: &CancellationToken,
        ) -> crate::Result<ItemOutcome> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            self.seen.lock().unwrap().push(item.uri.clone());

            if self.fail_id.as_deref() == Some(item.identity.id.as_str()) {
                return Err(CollectorError::Item {
                    package: item.identity.to_string(),
                    message: "storage unavailable".to_string(),
                });
            }
            if self.terminal_id.as_deref() == Some(item.identity.id.as_str()) {
                return Ok(ItemOutcome::Failed);
            }
            Ok(ItemOutcome::Ingested)
        }
    }

    #[tokio::test]
    async fn test_processes_every_item_within_concurrency() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = BatchDispatcher::new(processor.clone(), 3);
        let items: Vec<CommitItem> = (0..10).map(|i| item(&format!("P{}", i), "1.0.0", 1)).collect();

        let summary = dispatcher
            .dispatch(&batch(items), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 10);
        assert_eq!(summary.ingested, 10);
        assert_eq!(processor.seen.lock().unwrap().len(), 10);
        assert!(processor.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_terminal_item_failures_are_counted() {
        let processor = Arc::new(RecordingProcessor {
            terminal_id: Some("Bad".to_string()),
            ..Default::default()
        });
        let dispatcher = BatchDispatcher::new(processor, 2);
        let items = vec![item("Good", "1.0.0", 1), item("Bad", "1.0.0", 1)];

        let summary = dispatcher
            .dispatch(&batch(items), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.ingested, 1);
    }

    #[tokio::test]
    async fn test_error_fails_the_batch() {
        let processor = Arc::new(RecordingProcessor {
            fail_id: Some("Broken".to_string()),
            ..Default::default()
        });
        let dispatcher = BatchDispatcher::new(processor, 1);
        let mut items = vec![item("Broken", "1.0.0", 1)];
        items.extend((0..5).map(|i| item(&format!("P{}", i), "1.0.0", 1)));

        let result = dispatcher
            .dispatch(&batch(items), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(CollectorError::Item { .. })));
    }

    #[tokio::test]
    async fn test_keeps_latest_commit_per_identity() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = BatchDispatcher::new(processor.clone(), 4);
        let items = vec![
            item("Foo", "1.0.0", 1),
            item("Bar", "1.0.0", 1),
            item("foo", "1.0.0", 3),
            item("Foo", "2.0.0", 2),
        ];

        let summary = dispatcher
            .dispatch(&batch(items), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.processed, 3);
        let seen = processor.seen.lock().unwrap();
        assert!(seen.contains(&"foo/1.0.0/3".to_string()));
        assert!(!seen.contains(&"Foo/1.0.0/1".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_reports_cancellation() {
        let processor = Arc::new(RecordingProcessor::default());
        let dispatcher = BatchDispatcher::new(processor.clone(), 2);
        let items: Vec<CommitItem> = (0..4).map(|i| item(&format!("P{}", i), "1.0.0", 1)).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = dispatcher.dispatch(&batch(items), &cancel).await;

        assert!(matches!(result, Err(CollectorError::Cancelled)));
        assert!(processor.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_latest_per_identity_preserves_order() {
        let items = vec![
            item("A", "1.0.0", 1),
            item("B", "1.0.0", 1),
            item("A", "1.0.0", 2),
            item("C", "1.0.0", 2),
        ];

        let kept: Vec<String> = latest_per_identity(&items)
            .into_iter()
            .map(|i| i.uri)
            .collect();

        assert_eq!(kept, vec!["B/1.0.0/1", "A/1.0.0/2", "C/1.0.0/2"]);
    }
}
