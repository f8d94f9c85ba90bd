//! End-to-end collector runs over a JSON-lines catalog

use crate::{test_fetcher, test_settings};
use catalog_collector::catalog::JsonlCatalog;
use catalog_collector::cursor::{min_timestamp, ReadCursor, SqliteCursor, WriteCursor};
use catalog_collector::storage::{BlobStorage, FileSystemStorage, RunStatus, SqliteStore};
use catalog_collector::{BatchingStrategy, Collector, CopyResultCache, IconPipeline};
use chrono::{DateTime, Utc};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Workspace {
    _dir: TempDir,
    catalog_path: std::path::PathBuf,
    db_path: std::path::PathBuf,
    destination: Arc<FileSystemStorage>,
    packages: Arc<FileSystemStorage>,
    auxiliary: Arc<FileSystemStorage>,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path().to_path_buf();
        Self {
            catalog_path: root.join("catalog.jsonl"),
            db_path: root.join("collector.db"),
            destination: Arc::new(FileSystemStorage::new(root.join("icons")).unwrap()),
            packages: Arc::new(FileSystemStorage::new(root.join("packages")).unwrap()),
            auxiliary: Arc::new(FileSystemStorage::new(root.join("aux")).unwrap()),
            _dir: dir,
        }
    }

    fn write_catalog(&self, lines: &[String]) {
        std::fs::write(&self.catalog_path, lines.join("\n")).unwrap();
    }

    fn icon(&self, relative: &str) -> Option<Vec<u8>> {
        std::fs::read(self.destination.root().join(relative)).ok()
    }

    fn store(&self) -> Arc<Mutex<SqliteStore>> {
        Arc::new(Mutex::new(SqliteStore::new(&self.db_path).unwrap()))
    }

    /// Builds a collector the way the binary does
    async fn collector(&self, store: Arc<Mutex<SqliteStore>>) -> Collector {
        let catalog = Arc::new(JsonlCatalog::new(&self.catalog_path));
        let cache_location = self.auxiliary.resolve("icon-copy-results.json").unwrap();
        let cache = Arc::new(
            CopyResultCache::load(&*self.auxiliary, &cache_location)
                .await
                .unwrap(),
        );
        let pipeline = Arc::new(IconPipeline::new(
            catalog.clone(),
            self.destination.clone(),
            self.packages.clone(),
            test_fetcher(),
            cache.clone(),
            test_settings(),
        ));

        Collector::builder(
            Arc::new(SqliteCursor::new("icons", store.clone())),
            catalog,
            pipeline,
        )
        .concurrency(4)
        .batching(BatchingStrategy::LockStep)
        .persist_cache(cache, self.auxiliary.clone(), cache_location)
        .run_history(store, "test-hash")
        .build()
    }
}

fn details_line(id: &str, version: &str, timestamp: &str, extra: &str) -> String {
    format!(
        r#"{{"id":"{id}","version":"{version}","commitTimeStamp":"{timestamp}","type":"package-details","uri":"https://catalog.example.com/{id}.{version}.{timestamp}.json"{extra}}}"#
    )
}

fn delete_line(id: &str, version: &str, timestamp: &str) -> String {
    format!(
        r#"{{"id":"{id}","version":"{version}","commitTimeStamp":"{timestamp}","type":"package-delete","uri":"https://catalog.example.com/{id}.{version}.{timestamp}.delete.json"}}"#
    )
}

fn write_package(root: &Path, file_name: &str, entries: &[(&str, &[u8])]) {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    let archive = writer.finish().unwrap().into_inner();
    std::fs::write(root.join(file_name), archive).unwrap();
}

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_full_collection_run() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shared.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"shared-icon".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ws = Workspace::new();
    let shared = format!(r#","iconUrl":"{}/shared.png""#, mock_server.uri());
    let missing = format!(r#","iconUrl":"{}/missing.png""#, mock_server.uri());

    ws.write_catalog(&[
        details_line("Alpha", "1.0.0", "2024-03-01T10:00:01Z", &shared),
        details_line("Beta", "1.0", "2024-03-01T10:00:02Z", &shared),
        details_line("Gamma", "2.0.0", "2024-03-01T10:00:02Z", r#","iconFile":"images\\logo.png""#),
        details_line("Delta", "1.0.0", "2024-03-01T10:00:03Z", &missing),
        delete_line("Old", "0.1.0", "2024-03-01T10:00:04Z"),
        details_line("Alpha", "1.0.1", "2024-03-01T10:00:04Z", ""),
    ]);
    write_package(
        ws.packages.root(),
        "gamma.2.0.0.nupkg",
        &[("images/logo.png", b"embedded-icon")],
    );
    ws.destination
        .write_stream(
            &ws.destination.resolve("old/0.1.0/icon").unwrap(),
            catalog_collector::storage::stream_from_bytes("stale"),
        )
        .await
        .unwrap();

    let store = ws.store();
    let collector = ws.collector(store.clone()).await;

    collector.run(&CancellationToken::new(), true).await.unwrap();

    assert_eq!(ws.icon("alpha/1.0.0/icon").as_deref(), Some(&b"shared-icon"[..]));
    assert_eq!(ws.icon("beta/1.0.0/icon").as_deref(), Some(&b"shared-icon"[..]));
    assert_eq!(ws.icon("gamma/2.0.0/icon").as_deref(), Some(&b"embedded-icon"[..]));
    assert!(ws.icon("delta/1.0.0/icon").is_none());
    assert!(ws.icon("old/0.1.0/icon").is_none());

    // The front cursor survives a reopen of the database
    let reopened = SqliteCursor::new("icons", ws.store());
    assert_eq!(reopened.load().await.unwrap(), ts("2024-03-01T10:00:04Z"));

    let runs = store.lock().unwrap().recent_runs(1).unwrap();
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].items_processed, 6);
    assert_eq!(runs[0].config_hash, "test-hash");

    let cache_document = ws.auxiliary.root().join("icon-copy-results.json");
    assert!(cache_document.exists());
}

#[tokio::test]
async fn test_replay_reuses_persisted_cache() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/shared.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"shared-icon".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ws = Workspace::new();
    let shared = format!(r#","iconUrl":"{}/shared.png""#, mock_server.uri());
    ws.write_catalog(&[
        details_line("Alpha", "1.0.0", "2024-03-01T10:00:01Z", &shared),
        details_line("Beta", "1.0.0", "2024-03-01T10:00:02Z", &shared),
    ]);

    let store = ws.store();
    ws.collector(store.clone())
        .await
        .run(&CancellationToken::new(), true)
        .await
        .unwrap();

    // Rewind and run again with a collector that loads the saved cache
    SqliteCursor::new("icons", store.clone())
        .save(min_timestamp())
        .await
        .unwrap();
    std::fs::remove_file(ws.destination.root().join("beta/1.0.0/icon")).unwrap();

    ws.collector(store.clone())
        .await
        .run(&CancellationToken::new(), true)
        .await
        .unwrap();

    assert_eq!(ws.icon("beta/1.0.0/icon").as_deref(), Some(&b"shared-icon"[..]));
    let runs = store.lock().unwrap().recent_runs(2).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_nothing_to_do_leaves_front_untouched() {
    let ws = Workspace::new();
    ws.write_catalog(&[]);

    let store = ws.store();
    let collector = ws.collector(store.clone()).await;

    collector.run(&CancellationToken::new(), true).await.unwrap();

    let front = SqliteCursor::new("icons", store);
    assert_eq!(front.load().await.unwrap(), min_timestamp());
}
