//! Pipeline tests against a mock icon host

use crate::{test_fetcher, test_settings};
use catalog_collector::catalog::JsonlCatalog;
use catalog_collector::collector::ItemOutcome;
use catalog_collector::ingest::{CopyResultCache, IconPipeline};
use catalog_collector::storage::{BlobStorage, MemoryStorage};
use catalog_collector::{CommitItem, LeafKind, PackageDetails, PackageIdentity};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestPipeline {
    destination: Arc<MemoryStorage>,
    cache: Arc<CopyResultCache>,
    pipeline: IconPipeline,
}

fn create_pipeline() -> TestPipeline {
    let destination = Arc::new(MemoryStorage::new("icons").expect("storage"));
    let packages = Arc::new(MemoryStorage::new("packages").expect("storage"));
    let cache = Arc::new(CopyResultCache::new());
    // Details are passed in directly, so the catalog is never read
    let catalog = Arc::new(JsonlCatalog::new("/nonexistent/catalog.jsonl"));

    let pipeline = IconPipeline::new(
        catalog,
        destination.clone(),
        packages,
        test_fetcher(),
        cache.clone(),
        test_settings(),
    );

    TestPipeline {
        destination,
        cache,
        pipeline,
    }
}

fn package(id: &str, version: &str) -> CommitItem {
    CommitItem {
        identity: PackageIdentity::new(id, version),
        commit_timestamp: "2024-03-01T10:00:00Z".parse().unwrap(),
        uri: format!("https://catalog.example.com/{}.{}.json", id, version),
        kind: LeafKind::PackageDetails,
    }
}

fn icon_url(url: String) -> PackageDetails {
    PackageDetails {
        icon_url: Some(url),
        icon_file: None,
    }
}

#[tokio::test]
async fn test_shared_icon_is_fetched_once_and_copied() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/icon.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();
    let details = icon_url(format!("{}/icon.png", mock_server.uri()));
    let cancel = CancellationToken::new();

    let first = t
        .pipeline
        .process_details(&package("Foo", "1.0.0"), &details, &cancel)
        .await
        .unwrap();
    let second = t
        .pipeline
        .process_details(&package("Foo", "2.0.0"), &details, &cancel)
        .await
        .unwrap();

    assert_eq!(first, ItemOutcome::Ingested);
    assert_eq!(second, ItemOutcome::Copied);
    assert_eq!(t.destination.copy_count(), 1);

    for path in ["foo/1.0.0/icon", "foo/2.0.0/icon"] {
        let stored = t.destination.get(&t.destination.resolve(path).unwrap());
        assert_eq!(stored.as_deref(), Some(&b"png-bytes"[..]), "{}", path);
    }
}

#[tokio::test]
async fn test_failed_source_is_not_fetched_again() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();
    let details = icon_url(format!("{}/gone.png", mock_server.uri()));
    let cancel = CancellationToken::new();

    let first = t
        .pipeline
        .process_details(&package("Foo", "1.0.0"), &details, &cancel)
        .await
        .unwrap();
    let second = t
        .pipeline
        .process_details(&package("Bar", "1.0.0"), &details, &cancel)
        .await
        .unwrap();

    assert_eq!(first, ItemOutcome::Failed);
    assert_eq!(second, ItemOutcome::Skipped);
    assert!(t.destination.is_empty());
}

#[tokio::test]
async fn test_server_errors_use_the_attempt_budget() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();
    let details = icon_url(format!("{}/flaky.png", mock_server.uri()));

    let outcome = t
        .pipeline
        .process_details(&package("Foo", "1.0.0"), &details, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Failed);
    let source = Url::parse(&format!("{}/flaky.png", mock_server.uri())).unwrap();
    assert!(!t.cache.get(&source).unwrap().is_copy_succeeded());
}

#[tokio::test]
async fn test_permanent_redirects_within_bound_are_followed() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r0.png"))
        .respond_with(ResponseTemplate::new(308).insert_header("Location", "/r1.png"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r1.png"))
        .respond_with(
            ResponseTemplate::new(308)
                .insert_header("Location", format!("{}/final.png", mock_server.uri()).as_str()),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/final.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"final".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();
    let original = format!("{}/r0.png", mock_server.uri());

    let outcome = t
        .pipeline
        .process_details(
            &package("Foo", "1.0.0"),
            &icon_url(original.clone()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Ingested);
    // Cached under the url the package referenced, not the redirect target
    let cached = t.cache.get(&Url::parse(&original).unwrap()).unwrap();
    assert!(cached.is_copy_succeeded());
}

#[tokio::test]
async fn test_permanent_redirects_beyond_bound_are_terminal() {
    let mock_server = MockServer::start().await;
    for (from, to) in [("/s0.png", "/s1.png"), ("/s1.png", "/s2.png"), ("/s2.png", "/s3.png")] {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(ResponseTemplate::new(308).insert_header("Location", to))
            .mount(&mock_server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/s3.png"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();

    let outcome = t
        .pipeline
        .process_details(
            &package("Foo", "1.0.0"),
            &icon_url(format!("{}/s0.png", mock_server.uri())),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Failed);
    assert!(t.destination.is_empty());
}

#[tokio::test]
async fn test_ordinary_redirects_are_followed_by_the_client() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/moved.png"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/icon.png"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/icon.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let t = create_pipeline();

    let outcome = t
        .pipeline
        .process_details(
            &package("Foo", "1.0.0"),
            &icon_url(format!("{}/moved.png", mock_server.uri())),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, ItemOutcome::Ingested);
}

#[tokio::test]
async fn test_reingesting_same_item_is_idempotent() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/icon.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png".to_vec()))
        .mount(&mock_server)
        .await;

    let t = create_pipeline();
    let item = package("Foo", "1.0.0");
    let details = icon_url(format!("{}/icon.png", mock_server.uri()));
    let cancel = CancellationToken::new();

    t.pipeline.process_details(&item, &details, &cancel).await.unwrap();
    let location = t.destination.resolve("foo/1.0.0/icon").unwrap();
    let before = t.destination.get(&location);

    let again = t.pipeline.process_details(&item, &details, &cancel).await.unwrap();

    assert_eq!(again, ItemOutcome::Unchanged);
    assert_eq!(t.destination.get(&location), before);
}
