//! Integration tests for the HTTP API backend against a mock server.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use fetcher_core::catalog::TransportSettings;
use fetcher_core::{
    ApiBackend, BackendKind, ConcurrencyScheduler, IntegrityVerifier, RetryPolicy,
    SelectionError, ShellToolBackend, StatusStore, TaskCatalog, TransferBackend, TransferError,
    TransferRecord, TransferTask, select_backend,
};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

fn transport(server: &MockServer) -> TransportSettings {
    TransportSettings {
        endpoint: server.uri(),
        backends: vec![BackendKind::Api],
        ..TransportSettings::default()
    }
}

fn backend(transport: TransportSettings) -> ApiBackend {
    ApiBackend::new(
        transport,
        Some("org/data".to_string()),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn task(remote_path: &str, size_estimate_mb: Option<f64>) -> TransferTask {
    TransferTask {
        group: "g".to_string(),
        repository: "org/data".to_string(),
        remote_path: remote_path.to_string(),
        local_filename: remote_path.rsplit('/').next().unwrap().to_string(),
        size_estimate_mb,
        priority: 1,
        max_retries: 3,
    }
}

#[tokio::test]
async fn test_probe_succeeds_when_repository_metadata_is_reachable() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/api/datasets/org/data"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    assert!(backend(transport(&server)).probe().await);
}

#[tokio::test]
async fn test_probe_fails_on_missing_repository() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/api/datasets/org/data"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(!backend(transport(&server)).probe().await);
}

#[tokio::test]
async fn test_transfer_writes_body_to_target() {
    let server = require_mock_server!();
    let body = vec![7u8; 200_000];
    Mock::given(method("GET"))
        .and(path("/datasets/org/data/resolve/main/shards/part-0.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = backend(transport(&server))
        .transfer(&task("shards/part-0.bin", None), dir.path())
        .await
        .unwrap();

    assert_eq!(target, dir.path().join("part-0.bin"));
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[tokio::test]
async fn test_transfer_requests_encoded_path_for_reserved_characters() {
    let server = require_mock_server!();
    let body = vec![3u8; 200_000];
    Mock::given(method("GET"))
        .and(path("/datasets/org/data/resolve/main/dir/shard%20%231.tgz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = backend(transport(&server))
        .transfer(&task("dir/shard #1.tgz", None), dir.path())
        .await
        .unwrap();

    assert_eq!(target, dir.path().join("shard #1.tgz"));
    assert_eq!(std::fs::read(&target).unwrap(), body);
}

#[tokio::test]
async fn test_transfer_maps_server_error_to_http_status() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let result = backend(transport(&server))
        .transfer(&task("x/a.bin", None), dir.path())
        .await;

    assert!(matches!(
        result,
        Err(TransferError::HttpStatus { status: 500, .. })
    ));
}

#[tokio::test]
async fn test_token_is_sent_as_bearer_header() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/api/datasets/org/data"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let transport = TransportSettings {
        token: Some("secret-token".to_string()),
        ..transport(&server)
    };
    assert!(backend(transport).probe().await);
}

#[tokio::test]
async fn test_selection_falls_through_to_usable_backend() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let missing_tool: Arc<dyn TransferBackend> = Arc::new(
        ShellToolBackend::new(BackendKind::Wget, transport(&server), Duration::from_secs(5))
            .with_program("fetcher-test-missing-wget"),
    );
    let api: Arc<dyn TransferBackend> = Arc::new(backend(transport(&server)));

    let selected = select_backend(vec![missing_tool, api]).await.unwrap();
    assert_eq!(selected.kind(), BackendKind::Api);
}

#[tokio::test]
async fn test_selection_fails_when_probe_is_rejected() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let api: Arc<dyn TransferBackend> = Arc::new(backend(transport(&server)));
    let result = select_backend(vec![api]).await;

    assert!(matches!(
        result,
        Err(SelectionError::NoTransportAvailable { ref tried }) if tried == &[BackendKind::Api]
    ));
}

#[tokio::test]
async fn test_catalog_run_end_to_end_over_http() {
    let server = require_mock_server!();
    let mib = vec![1u8; 1_048_576];
    Mock::given(method("GET"))
        .and(path("/datasets/org/data/resolve/main/meta/labels.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(mib.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/datasets/org/data/resolve/main/shards/train.tar"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let catalog = TaskCatalog::from_json_str(&format!(
        r#"{{
            "repository": "org/data",
            "global_settings": {{"max_retries": 2}},
            "transport": {{"endpoint": "{}", "backends": ["api"]}},
            "download_tasks": [
                {{"name": "meta", "priority": 1, "files": [{{"path": "meta/labels.csv", "size_estimate_mb": 1.0}}]}},
                {{"name": "train", "priority": 2, "files": [{{"path": "shards/train.tar"}}]}}
            ]
        }}"#,
        server.uri()
    ))
    .unwrap();

    let dir = TempDir::new().unwrap();
    let store = Arc::new(StatusStore::open_in(dir.path(), HashSet::new()).unwrap());
    let api: Arc<dyn TransferBackend> = Arc::new(
        ApiBackend::new(
            catalog.transport().clone(),
            catalog.probe_repository().map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap(),
    );

    let scheduler = ConcurrencyScheduler::for_backend(
        3,
        BackendKind::Api,
        RetryPolicy::new(2.0).with_delay_unit(Duration::from_millis(5)),
        IntegrityVerifier::default(),
    )
    .unwrap();
    let stats = scheduler
        .run(
            catalog.plan(|f| store.is_completed(f)),
            api,
            Arc::clone(&store),
            dir.path(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap();

    assert_eq!(stats.completed(), 1);
    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.success_rate(), Some(50.0));
    assert!(store.is_completed("labels.csv"));
    assert!(matches!(
        store.get("train.tar"),
        Some(TransferRecord::Failed { attempts: 2, .. })
    ));

    // The persisted file is what a later run sees.
    let reopened = StatusStore::open_in(dir.path(), HashSet::new()).unwrap();
    assert!(reopened.is_completed("labels.csv"));
    assert!(!reopened.is_completed("train.tar"));
}
