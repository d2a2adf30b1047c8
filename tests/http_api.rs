//! HTTP API Tests
//!
//! Drive the full router against an in-memory SQLite index and a local-disk
//! object store.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use file_depot::{
    db,
    routes::routes::routes,
    services::{file_service::FileService, local_store::LocalObjectStore},
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "X-FILE-DEPOT-BOUNDARY";

/// Create a router backed by fresh stores; the temp dir must outlive it.
async fn create_test_app(max_upload_bytes: usize) -> (Router, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let pool = db::connect("sqlite::memory:", 1)
        .await
        .expect("Failed to create test database");
    db::ensure_schema(&pool).await.expect("Failed to create schema");
    let store = LocalObjectStore::open(dir.path())
        .await
        .expect("Failed to open object store");

    let service = FileService::new(Arc::new(pool), Arc::new(store), "audio/mpeg");
    (routes(max_upload_bytes).with_state(service), dir)
}

fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri("/upload/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn upload(app: &Router, filename: &str, content: &[u8]) -> Response {
    send(app, multipart_request("file", filename, content)).await
}

// ============================================================================
// Upload / list / download scenario
// ============================================================================

#[tokio::test]
async fn test_upload_list_download_scenario() {
    let (app, _dir) = create_test_app(1024 * 1024).await;

    let response = upload(&app, "track1.mp3", b"ID3...data...").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "File 'track1.mp3' uploaded successfully!");
    let id = body["id"].as_i64().expect("numeric id");

    let response = send(&app, get("/files/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["id"], id);
    assert_eq!(files[0]["filename"], "track1.mp3");

    let response = send(&app, get("/download/track1.mp3")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=track1.mp3"
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
    assert_eq!(body_bytes(response).await, b"ID3...data...");
}

#[tokio::test]
async fn test_list_is_empty_initially() {
    let (app, _dir) = create_test_app(1024).await;

    let response = send(&app, get("/files/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["files"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_list_reflects_distinct_uploads() {
    let (app, _dir) = create_test_app(1024).await;

    for name in ["one.mp3", "two.mp3", "three.mp3"] {
        let response = upload(&app, name, name.as_bytes()).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = body_json(send(&app, get("/files/")).await).await;
    let mut names: Vec<&str> = body["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["filename"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, ["one.mp3", "three.mp3", "two.mp3"]);
}

// ============================================================================
// Failure mapping
// ============================================================================

#[tokio::test]
async fn test_download_unknown_file_returns_404() {
    let (app, _dir) = create_test_app(1024).await;

    let response = send(&app, get("/download/nonexistent.mp3")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"], "File not found");
}

#[tokio::test]
async fn test_duplicate_upload_returns_400() {
    let (app, _dir) = create_test_app(1024).await;

    assert_eq!(upload(&app, "song.mp3", b"v1").await.status(), StatusCode::OK);

    let response = upload(&app, "song.mp3", b"v2").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    let response = send(&app, get("/download/song.mp3")).await;
    assert_eq!(body_bytes(response).await, b"v1");

    let body = body_json(send(&app, get("/files/")).await).await;
    assert_eq!(body["files"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_upload_without_file_field_returns_400() {
    let (app, _dir) = create_test_app(1024).await;

    let response = send(&app, multipart_request("attachment", "a.mp3", b"data")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn test_upload_rejected_by_store_returns_400() {
    let (app, _dir) = create_test_app(1024).await;

    let response = upload(&app, "../escape.mp3", b"data").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(send(&app, get("/files/")).await).await;
    assert_eq!(body["files"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_upload_over_body_limit_is_rejected() {
    let (app, _dir) = create_test_app(64).await;

    let response = upload(&app, "big.mp3", &[0u8; 256]).await;
    assert!(response.status().is_client_error());

    let body = body_json(send(&app, get("/files/")).await).await;
    assert_eq!(body["files"], Value::Array(vec![]));
}

// ============================================================================
// Health checks
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let (app, _dir) = create_test_app(1024).await;

    let response = send(&app, get("/healthz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = send(&app, get("/readyz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["checks"]["object_store"]["ok"], true);
}
