//! Icon ingestion
//!
//! The per-item side of the collector: external fetches, embedded icon
//! copies and the copy-result cache that deduplicates them.

mod cache;
mod fetcher;
mod pipeline;

pub use cache::{CopyResult, CopyResultCache, SourceLock};
pub use fetcher::{
    build_http_client, classify_status, ExternalFetcher, FetchError, FetchResponse, HttpFetcher,
    ResponseClass, MAX_TRANSPORT_REDIRECTS,
};
pub use pipeline::{is_valid_icon_url, IconPipeline, IngestionOutcome};

use crate::config::IngestConfig;
use crate::retry::RetryPolicy;
use std::time::Duration;

/// Attempt budgets and redirect bound of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSettings {
    /// Retry policy for fetching an external source
    pub ingest_policy: RetryPolicy,

    /// Retry policy for storage copies and deletes
    pub copy_policy: RetryPolicy,

    /// HTTP 308 hops followed within one attempt
    pub max_redirects: u32,
}

impl IngestSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        let initial_wait = Duration::from_millis(config.initial_wait_ms);
        let wait_increment = Duration::from_millis(config.wait_increment_ms);
        Self {
            ingest_policy: RetryPolicy::new(config.max_ingest_attempts, initial_wait, wait_increment),
            copy_policy: RetryPolicy::new(config.max_copy_attempts, initial_wait, wait_increment),
            max_redirects: config.max_redirects,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}
