//! Defines the HTTP surface of the file service.
//!
//! - `POST /upload/`               multipart upload (field `file`)
//! - `GET  /download/{file_name}`  stream a stored file as an attachment
//! - `GET  /files/`                list indexed files
//! - `GET  /healthz`, `GET /readyz` health checks

use crate::{
    handlers::{
        file_handlers::{download_file, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    services::file_service::FileService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Upload bodies up to `max_upload_bytes` are accepted.
///
/// The router carries shared state (`FileService`) to all handlers.
pub fn routes(max_upload_bytes: usize) -> Router<FileService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload/",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/download/{file_name}", get(download_file))
        .route("/files/", get(list_files))
}
