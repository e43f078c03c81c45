mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use common::init_test_logging;
use rbc::{
    ClientError, CoordinatorApi, HttpCoordinator, PollSettings, RemoteBuildClient, RemoteSettings,
};
use rbc_common::{BuildRequest, BuildState, BuildStatusResponse, ClientConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const API_KEY: &str = "test-key-0123";
const ARTIFACT_SIZE: usize = 64 * 1024;

#[derive(Default)]
struct ServerState {
    polls: AtomicUsize,
    submissions: Mutex<Vec<Value>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {API_KEY}"))
}

async fn submit_build(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    let duplicate = body["version"] == "9.9.9";
    state.submissions.lock().unwrap().push(body);
    if duplicate {
        return (StatusCode::CONFLICT, Json(json!({ "build_id": "existing-7" }))).into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({ "build_id": "b-42", "queue_position": 2, "estimated_time": 30.0 })),
    )
        .into_response()
}

async fn build_status(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if state.polls.fetch_add(1, Ordering::SeqCst) == 0 {
        return Json(json!({ "status": "running", "progress": 0.5 })).into_response();
    }
    Json(json!({
        "status": "completed",
        "binary_url": format!("/artifacts/{id}"),
        "node_id": "n1",
        "build_time_seconds": 12.5,
    }))
    .into_response()
}

async fn artifact(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match id.as_str() {
        "empty" => return Vec::<u8>::new().into_response(),
        "missing" => return (StatusCode::NOT_FOUND, "no such artifact").into_response(),
        _ => {}
    }
    vec![0xABu8; ARTIFACT_SIZE].into_response()
}

async fn start_server() -> (String, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/builds", post(submit_build))
        .route("/builds/{id}", get(build_status))
        .route("/artifacts/{id}", get(artifact))
        .route("/health", get(|| async { Json(json!({ "status": "healthy" })) }))
        .route(
            "/architectures",
            get(|| async { Json(json!({ "architectures": ["darwin-arm64", "linux-x64"] })) }),
        )
        .route("/queue/status", get(|| async { Json(json!({ "active_jobs": 1 })) }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

/// A separate artifact host that records the `Authorization` header of every request.
async fn start_artifact_host() -> (String, Arc<Mutex<Vec<Option<String>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route(
            "/bin",
            get(
                |State(seen): State<Arc<Mutex<Vec<Option<String>>>>>, headers: HeaderMap| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push(auth);
                    vec![0xCDu8; 1024]
                },
            ),
        )
        .with_state(seen.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}

/// Serves one response whose body arrives in `chunks` pieces of 1 KiB,
/// `gap` apart. Pieces past `sent` are never written and the connection
/// stays open.
async fn start_trickling_server(chunks: usize, sent: usize, gap: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\n\r\n",
            chunks * 1024
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for _ in 0..sent {
            tokio::time::sleep(gap).await;
            socket.write_all(&[0xEFu8; 1024]).await.unwrap();
            socket.flush().await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    });
    format!("http://{addr}")
}

fn client_config(url: &str, key: &str, output_dir: &std::path::Path) -> ClientConfig {
    ClientConfig {
        coordinator_url: Some(format!("{url}/")),
        api_key: Some(key.to_string()),
        output_dir: output_dir.to_path_buf(),
        ..ClientConfig::default()
    }
}

fn fast_client(config: &ClientConfig) -> RemoteBuildClient<HttpCoordinator> {
    let mut settings = RemoteSettings::from(config);
    settings.poll = PollSettings {
        interval: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
    };
    RemoteBuildClient::new(HttpCoordinator::new(config).unwrap(), settings)
}

fn request(version: &str) -> BuildRequest {
    BuildRequest::builder(version, "linux-x64".parse().unwrap())
        .plugins(vec!["react@18.2.0", "esbuild"])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_full_remote_build_over_http() {
    init_test_logging();
    crate::test_log!("TEST START: test_full_remote_build_over_http");

    let (url, server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let artifact = client.build(&request("1.0.0")).await.unwrap();
    assert_eq!(artifact.build_id, "b-42");
    assert!(!artifact.reused);
    assert_eq!(artifact.node_id.as_deref(), Some("n1"));
    assert_eq!(artifact.build_time_seconds, Some(12.5));
    assert_eq!(artifact.path, dir.path().join("app-linux-x64"));
    assert_eq!(artifact.bytes, ARTIFACT_SIZE as u64);
    assert_eq!(std::fs::read(&artifact.path).unwrap().len(), ARTIFACT_SIZE);
    assert_eq!(server.polls.load(Ordering::SeqCst), 2);

    let submissions = server.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0]["target_arch"], "linux-x64");
    assert_eq!(
        submissions[0]["plugins"],
        json!([
            { "name": "esbuild", "version": "latest" },
            { "name": "react", "version": "18.2.0" },
        ])
    );

    crate::test_log!("TEST PASS: test_full_remote_build_over_http");
}

#[tokio::test]
async fn test_conflict_reuses_existing_build() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let outcome = client.submit(&request("9.9.9")).await.unwrap();
    assert_eq!(outcome.build_id, "existing-7");
    assert!(outcome.reused);
}

#[tokio::test]
async fn test_rejected_credentials_surface_http_error() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, "wrong-key", dir.path()));

    let err = client.submit(&request("1.0.0")).await.unwrap_err();
    match err {
        ClientError::Http { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "bad token");
        }
        other => panic!("expected HTTP error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_download_leaves_no_file() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some("/artifacts/empty".to_string());
    let err = client
        .retrieve("empty", &status, "darwin-arm64".parse().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::EmptyArtifact { .. }));
    assert!(!dir.path().join("app-darwin-arm64").exists());
}

#[tokio::test]
async fn test_auxiliary_endpoints() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    client.api().health().await.unwrap();
    assert_eq!(
        client.api().architectures().await.unwrap(),
        vec!["darwin-arm64", "linux-x64"]
    );
    assert_eq!(client.api().queue_status().await.unwrap()["active_jobs"], 1);
}

#[tokio::test]
async fn test_unreachable_coordinator() {
    init_test_logging();

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));
    let err = client.api().health().await.unwrap_err();
    assert!(matches!(err, ClientError::Unreachable(_)), "got {err:?}");
}

#[tokio::test]
async fn test_foreign_artifact_host_gets_no_credentials() {
    init_test_logging();
    crate::test_log!("TEST START: test_foreign_artifact_host_gets_no_credentials");

    let (url, _server) = start_server().await;
    let (cdn, seen) = start_artifact_host().await;
    let dir = tempfile::tempdir().unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some(format!("{cdn}/bin"));
    let (path, bytes) = client
        .retrieve("b-42", &status, "linux-x64".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(bytes, 1024);
    assert_eq!(std::fs::read(path).unwrap(), vec![0xCDu8; 1024]);
    assert_eq!(*seen.lock().unwrap(), vec![None]);

    crate::test_log!("TEST PASS: test_foreign_artifact_host_gets_no_credentials");
}

#[tokio::test]
async fn test_failed_download_keeps_previous_artifact() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let previous = dir.path().join("app-linux-x64");
    std::fs::write(&previous, b"previous good build").unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some("/artifacts/missing".to_string());
    let err = client
        .retrieve("missing", &status, "linux-x64".parse().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Http { status: 404, .. }), "got {err:?}");
    assert_eq!(std::fs::read(&previous).unwrap(), b"previous good build");
    assert!(!dir.path().join("app-linux-x64.part").exists());
}

#[tokio::test]
async fn test_successful_download_replaces_previous_artifact() {
    init_test_logging();

    let (url, _server) = start_server().await;
    let dir = tempfile::tempdir().unwrap();
    let previous = dir.path().join("app-linux-x64");
    std::fs::write(&previous, b"previous good build").unwrap();
    let client = fast_client(&client_config(&url, API_KEY, dir.path()));

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some("/artifacts/b-42".to_string());
    let (path, bytes) = client
        .retrieve("b-42", &status, "linux-x64".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(path, previous);
    assert_eq!(bytes, ARTIFACT_SIZE as u64);
    assert_eq!(std::fs::read(&previous).unwrap().len(), ARTIFACT_SIZE);
    assert!(!dir.path().join("app-linux-x64.part").exists());
}

#[tokio::test]
async fn test_slow_download_outlasting_request_timeout() {
    init_test_logging();

    let url = start_trickling_server(4, 4, Duration::from_millis(600)).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = client_config(&url, API_KEY, dir.path());
    config.request_timeout_secs = 1;
    let client = fast_client(&config);

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some("/slow".to_string());
    let (path, bytes) = client
        .retrieve("slow", &status, "linux-x64".parse().unwrap())
        .await
        .unwrap();

    assert_eq!(bytes, 4 * 1024);
    assert_eq!(std::fs::read(path).unwrap().len(), 4 * 1024);
}

#[tokio::test]
async fn test_stalled_download_is_a_transport_error() {
    init_test_logging();

    let url = start_trickling_server(4, 1, Duration::from_millis(10)).await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = client_config(&url, API_KEY, dir.path());
    config.request_timeout_secs = 1;
    let client = fast_client(&config);

    let mut status = BuildStatusResponse::new(BuildState::Completed);
    status.binary_url = Some("/stalled".to_string());
    let err = client
        .retrieve("stalled", &status, "linux-x64".parse().unwrap())
        .await
        .unwrap_err();

    match err {
        ClientError::Unreachable(message) => assert!(message.contains("timed out"), "got {message}"),
        other => panic!("expected a transport timeout, got {other:?}"),
    }
    assert!(!dir.path().join("app-linux-x64").exists());
    assert!(!dir.path().join("app-linux-x64.part").exists());
}
