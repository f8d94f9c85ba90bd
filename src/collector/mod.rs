//! Collector module
//!
//! This module drives incremental consumption of the catalog:
//! - Splitting a commit range into batches (`batching`)
//! - Running one batch through a bounded worker pool (`dispatcher`)
//! - The cursor-bounded polling loop (`runner`)

mod batching;
mod dispatcher;
mod runner;

pub use batching::{create_batches, BatchingStrategy, CommitBatch};
pub use dispatcher::{BatchDispatcher, DispatchSummary};
pub use runner::{Collector, CollectorBuilder, IterationOutcome};

use crate::catalog::CommitItem;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Result of processing one commit item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Content was fetched from its source and stored
    Ingested,

    /// Content was copied from a previously ingested blob
    Copied,

    /// The destination already held the content
    Unchanged,

    /// The destination was deleted
    Deleted,

    /// Nothing to do for this item
    Skipped,

    /// The item failed terminally; logged and counted, the batch goes on
    Failed,
}

/// Per-item work run by the dispatcher
///
/// Returning `Err` fails the whole batch. Terminal per-item problems are
/// reported as [`ItemOutcome::Failed`] instead.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(
        &self,
        item: &CommitItem,
        cancel: &CancellationToken,
    ) -> crate::Result<ItemOutcome>;
}
