use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::file_service::FileServiceError;

/// Fixed body for every failed download, whatever the underlying cause.
pub const FILE_NOT_FOUND: &str = "File not found";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Upload failures of any kind surface as 400 with the cause as detail.
    pub fn from_upload(err: FileServiceError) -> Self {
        tracing::warn!(error = %err, "upload failed");
        Self::bad_request(err.to_string())
    }

    /// Download failures of any kind surface as the same 404; the cause is only logged.
    pub fn from_download(err: FileServiceError) -> Self {
        tracing::warn!(error = %err, "download failed");
        Self::not_found(FILE_NOT_FOUND)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<FileServiceError> for AppError {
    fn from(err: FileServiceError) -> Self {
        match err {
            FileServiceError::NotFound { .. } => AppError::not_found(FILE_NOT_FOUND),
            FileServiceError::InvalidFilename
            | FileServiceError::DuplicateRecord(_)
            | FileServiceError::UpstreamWrite(_) => AppError::bad_request(err.to_string()),
            FileServiceError::Database(_) => {
                tracing::error!(error = %err, "metadata store failure");
                AppError::internal(err.to_string())
            }
        }
    }
}
