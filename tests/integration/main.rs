//! Integration tests for the collector
//!
//! These tests use wiremock to stand in for external icon hosts and run the
//! pipeline and the collector loop against real file-system and SQLite storage.

mod collector_tests;
mod ingest_tests;

use catalog_collector::config::UserAgentConfig;
use catalog_collector::ingest::{build_http_client, HttpFetcher, IngestSettings};
use catalog_collector::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Real HTTP fetcher with a test user agent
pub fn test_fetcher() -> Arc<HttpFetcher> {
    let user_agent = UserAgentConfig {
        name: "TestCollector".to_string(),
        version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
    };
    let client = build_http_client(&user_agent, Duration::from_secs(5))
        .expect("Failed to build HTTP client");
    Arc::new(HttpFetcher::new(client))
}

/// Three attempts, no waiting, at most two 308 hops
pub fn test_settings() -> IngestSettings {
    IngestSettings {
        ingest_policy: RetryPolicy::immediate(3),
        copy_policy: RetryPolicy::immediate(3),
        max_redirects: 2,
    }
}
