use crate::collector::BatchingStrategy;
use crate::ConfigError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::SocketAddr;

/// Main configuration structure for the collector
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub collector: CollectorConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub catalog: CatalogConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Polling and batching behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Number of workers per batch
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub batching: BatchingStrategy,

    /// Pause after an idle iteration (seconds)
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Name of this job's cursor in the progress database
    #[serde(rename = "front-cursor")]
    pub front_cursor: String,

    /// Name of another job's cursor bounding this one
    #[serde(rename = "back-cursor", default)]
    pub back_cursor: Option<String>,

    /// Fixed upper bound (RFC 3339)
    #[serde(rename = "back-timestamp", default)]
    pub back_timestamp: Option<String>,
}

impl CollectorConfig {
    /// Parses `back-timestamp`, if set
    pub fn fixed_back_bound(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.back_timestamp
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| ConfigError::InvalidTimestamp(format!("back-timestamp '{}': {}", raw, e)))
            })
            .transpose()
    }
}

/// Attempt budgets of the ingestion pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    #[serde(rename = "max-ingest-attempts")]
    pub max_ingest_attempts: u32,

    #[serde(rename = "max-copy-attempts")]
    pub max_copy_attempts: u32,

    /// Wait before the first retry (milliseconds)
    #[serde(rename = "initial-wait-ms")]
    pub initial_wait_ms: u64,

    /// Added to the wait for every further retry (milliseconds)
    #[serde(rename = "wait-increment-ms")]
    pub wait_increment_ms: u64,

    /// HTTP 308 hops followed within one attempt
    #[serde(rename = "max-redirects")]
    pub max_redirects: u32,

    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_ingest_attempts: 3,
            max_copy_attempts: 3,
            initial_wait_ms: 5000,
            wait_increment_ms: 1000,
            max_redirects: 10,
            request_timeout_secs: 30,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    pub name: String,
    pub version: String,

    /// URL with information about the collector
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Catalog source
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON-lines catalog file
    pub path: String,
}

/// Storage locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding cursors and run history
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root of the ingested icons
    #[serde(rename = "destination-root")]
    pub destination_root: String,

    /// Root holding `{id}.{version}.nupkg` package archives
    #[serde(rename = "package-root")]
    pub package_root: String,

    /// Root of auxiliary documents such as the copy-result cache
    #[serde(rename = "auxiliary-root")]
    pub auxiliary_root: String,

    /// Copy-result cache document, relative to `auxiliary-root`
    #[serde(rename = "cache-name", default = "default_cache_name")]
    pub cache_name: String,
}

/// Metrics export
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics on this address; unset keeps them in process
    #[serde(rename = "listen-address", default)]
    pub listen_address: Option<String>,
}

impl MetricsConfig {
    /// Parses `listen-address`, if set
    pub fn socket_address(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.listen_address
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|e| {
                    ConfigError::Validation(format!("metrics listen-address '{}': {}", raw, e))
                })
            })
            .transpose()
    }
}

fn default_concurrency() -> usize {
    16
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_cache_name() -> String {
    "icon-copy-results.json".to_string()
}
