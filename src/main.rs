//! Catalog collector main entry point
//!
//! This is the command-line interface for the incremental icon collector.

use anyhow::{bail, Context};
use catalog_collector::catalog::JsonlCatalog;
use catalog_collector::config::{load_config_with_hash, Config};
use catalog_collector::cursor::{MemoryCursor, ReadCursor, SqliteCursor, WriteCursor};
use catalog_collector::ingest::{build_http_client, HttpFetcher, IngestSettings};
use catalog_collector::storage::{BlobStorage, FileSystemStorage, SqliteStore};
use catalog_collector::telemetry::MetricsExporter;
use catalog_collector::{Collector, CopyResultCache, IconPipeline};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Catalog collector: incremental catalog consumer with icon ingestion
///
/// Tails the package catalog between a front and a back cursor, and copies
/// every package icon into destination storage. Progress is checkpointed per
/// batch, so an interrupted run resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "catalog-collector")]
#[command(version = "1.0.0")]
#[command(about = "Incremental catalog collector with icon ingestion", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Stop at the first iteration without new commits
    #[arg(long)]
    once: bool,

    /// Validate config and show cursors without collecting
    #[arg(long, conflicts_with_all = ["stats", "reset_front"])]
    dry_run: bool,

    /// Show cursors and recent runs from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "reset_front"])]
    stats: bool,

    /// Overwrite the front cursor with an RFC 3339 timestamp and exit
    #[arg(long, value_name = "TIMESTAMP", conflicts_with_all = ["dry_run", "stats"])]
    reset_front: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config).await
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(timestamp) = cli.reset_front.as_deref() {
        handle_reset_front(&config, timestamp).await
    } else {
        handle_collect(config, config_hash, cli.once).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_collector=info,warn"),
            1 => EnvFilter::new("catalog_collector=debug,info"),
            2 => EnvFilter::new("catalog_collector=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<Arc<Mutex<SqliteStore>>> {
    let store = SqliteStore::new(Path::new(&config.storage.database_path)).with_context(|| {
        format!(
            "Failed to open progress database {}",
            config.storage.database_path
        )
    })?;
    Ok(Arc::new(Mutex::new(store)))
}

/// Picks the back bound: another job's cursor, a fixed timestamp, or none
fn back_cursor(
    config: &Config,
    store: &Arc<Mutex<SqliteStore>>,
) -> anyhow::Result<Arc<dyn ReadCursor>> {
    let cursor: Arc<dyn ReadCursor> = if let Some(name) = &config.collector.back_cursor {
        Arc::new(SqliteCursor::new(name.clone(), Arc::clone(store)))
    } else {
        match config.collector.fixed_back_bound()? {
            Some(bound) => Arc::new(MemoryCursor::new("back-timestamp", bound)),
            None => Arc::new(MemoryCursor::max()),
        }
    };
    Ok(cursor)
}

/// Handles the --dry-run mode: validates config and shows the cursor range
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Catalog Collector Dry Run ===\n");

    println!("Collector Configuration:");
    println!("  Concurrency: {}", config.collector.concurrency);
    println!("  Batching: {}", config.collector.batching);
    println!("  Poll interval: {}s", config.collector.poll_interval_secs);

    println!("\nIngestion:");
    println!("  Max ingest attempts: {}", config.ingest.max_ingest_attempts);
    println!("  Max copy attempts: {}", config.ingest.max_copy_attempts);
    println!(
        "  Backoff: {}ms + {}ms per retry",
        config.ingest.initial_wait_ms, config.ingest.wait_increment_ms
    );
    println!("  Max redirects: {}", config.ingest.max_redirects);
    println!("  Request timeout: {}s", config.ingest.request_timeout_secs);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.name);
    println!("  Version: {}", config.user_agent.version);
    println!("  Contact URL: {}", config.user_agent.contact_url);

    println!("\nStorage:");
    println!("  Catalog: {}", config.catalog.path);
    println!("  Database: {}", config.storage.database_path);
    println!("  Destination: {}", config.storage.destination_root);
    println!("  Packages: {}", config.storage.package_root);
    println!(
        "  Copy-result cache: {}/{}",
        config.storage.auxiliary_root, config.storage.cache_name
    );

    let store = open_store(config)?;
    let front = SqliteCursor::new(config.collector.front_cursor.clone(), Arc::clone(&store));
    let back = back_cursor(config, &store)?;

    println!("\nMetrics:");
    match &config.metrics.listen_address {
        Some(address) => println!("  Prometheus endpoint: http://{}/metrics", address),
        None => println!("  Prometheus endpoint: disabled (rendered on exit)"),
    }

    println!("\nCursors:");
    println!("  Front ({}): {}", front.name(), front.load().await?);
    println!("  Back ({}): {}", back.name(), back.load().await?);

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Handles the --stats mode: shows cursors and recent runs
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let store = SqliteStore::new(Path::new(&config.storage.database_path))?;

    println!("Cursors:");
    for (name, value, updated_at) in store.list_cursors()? {
        println!("  {:<32} {}  (updated {})", name, value, updated_at);
    }

    println!("\nRecent runs:");
    for run in store.recent_runs(10)? {
        println!(
            "  #{:<5} {:<12} started {}  finished {}  batches {}  items {}",
            run.id,
            run.status.to_db_string(),
            run.started_at,
            run.finished_at.as_deref().unwrap_or("-"),
            run.batches_processed,
            run.items_processed
        );
    }

    Ok(())
}

/// Handles the --reset-front mode: overwrites the front cursor
async fn handle_reset_front(config: &Config, timestamp: &str) -> anyhow::Result<()> {
    let value: DateTime<Utc> = match DateTime::parse_from_rfc3339(timestamp) {
        Ok(value) => value.with_timezone(&Utc),
        Err(e) => bail!("Invalid timestamp '{}': {}", timestamp, e),
    };

    let store = open_store(config)?;
    let front = SqliteCursor::new(config.collector.front_cursor.clone(), store);
    let previous = front.load().await?;
    front.save(value).await?;

    println!(
        "✓ Front cursor '{}' moved from {} to {}",
        config.collector.front_cursor, previous, value
    );
    Ok(())
}

/// Handles the main collection loop
async fn handle_collect(config: Config, config_hash: String, once: bool) -> anyhow::Result<()> {
    let exporter = MetricsExporter::install(config.metrics.socket_address()?)
        .context("Failed to install metrics recorder")?;
    if let MetricsExporter::Http(address) = &exporter {
        tracing::info!("Serving metrics on http://{}/metrics", address);
    }

    let store = open_store(&config)?;
    let front = Arc::new(SqliteCursor::new(
        config.collector.front_cursor.clone(),
        Arc::clone(&store),
    ));
    let back = back_cursor(&config, &store)?;

    let catalog = Arc::new(JsonlCatalog::new(&config.catalog.path));
    let destination = Arc::new(FileSystemStorage::new(&config.storage.destination_root)?);
    let packages = Arc::new(FileSystemStorage::new(&config.storage.package_root)?);
    let auxiliary = Arc::new(FileSystemStorage::new(&config.storage.auxiliary_root)?);

    let cache_location = auxiliary.resolve(&config.storage.cache_name)?;
    let cache = Arc::new(CopyResultCache::load(&*auxiliary, &cache_location).await?);

    let client = build_http_client(
        &config.user_agent,
        Duration::from_secs(config.ingest.request_timeout_secs),
    )?;
    let pipeline = Arc::new(IconPipeline::new(
        catalog.clone(),
        destination,
        packages,
        Arc::new(HttpFetcher::new(client)),
        Arc::clone(&cache),
        IngestSettings::from_config(&config.ingest),
    ));

    let collector = Collector::builder(front, catalog, pipeline)
        .back_cursor(back)
        .concurrency(config.collector.concurrency)
        .batching(config.collector.batching)
        .poll_interval(Duration::from_secs(config.collector.poll_interval_secs))
        .persist_cache(cache, auxiliary, cache_location)
        .run_history(store, config_hash)
        .build();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping");
                cancel.cancel();
            }
        });
    }

    tracing::info!(
        "Collecting with {} workers, {} batching{}",
        config.collector.concurrency,
        config.collector.batching,
        if once { ", single pass" } else { "" }
    );

    let result = collector.run(&cancel, once).await;
    if let Some(rendered) = exporter.render() {
        tracing::debug!("Final metrics:\n{}", rendered);
    }

    match result {
        Ok(()) => {
            tracing::info!("Collector stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Collector failed: {}", e);
            Err(e.into())
        }
    }
}
