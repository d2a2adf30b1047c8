//! HTTP handlers for upload, download and listing.
//! Every failure is mapped to its HTTP status here, at the outermost
//! boundary; `FileService` keeps the distinct causes.

use crate::{
    errors::AppError,
    models::file_record::{FileListing, UploadReceipt},
    services::file_service::FileService,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tracing::debug;

/// Multipart field carrying the uploaded file.
const FILE_FIELD: &str = "file";

/// `POST /upload/`: store the `file` field of a multipart form.
pub async fn upload_file(
    State(service): State<FileService>,
    mut multipart: Multipart,
) -> Result<Json<UploadReceipt>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.to_string()))?;
        debug!("received upload {} ({} bytes)", filename, data.len());

        let record = service
            .upload(&filename, data)
            .await
            .map_err(AppError::from_upload)?;
        return Ok(Json(UploadReceipt::from(&record)));
    }

    Err(AppError::bad_request(format!(
        "missing multipart field `{}`",
        FILE_FIELD
    )))
}

/// `GET /download/{file_name}`: stream the object back as an attachment.
pub async fn download_file(
    State(service): State<FileService>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let download = service
        .download(&file_name)
        .await
        .map_err(AppError::from_download)?;

    let mut response = Response::new(Body::from_stream(download.body));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(
        response.headers_mut(),
        &download.content_type,
        &download.filename,
        download.content_length,
    );

    Ok(response)
}

/// `GET /files/`: every indexed file.
pub async fn list_files(State(service): State<FileService>) -> Result<Json<FileListing>, AppError> {
    let files = service.list_files().await?;
    Ok(Json(FileListing { files }))
}

fn set_download_headers(
    headers: &mut HeaderMap,
    content_type: &str,
    filename: &str,
    content_length: Option<u64>,
) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(filename));
    if let Some(length) = content_length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
}

/// `attachment; filename=<name>`, or the RFC 5987 form when the name is not
/// plain printable ASCII.
fn content_disposition(filename: &str) -> HeaderValue {
    if filename.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename={}", filename)) {
            return value;
        }
    }
    let encoded = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&encoded).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_names_use_simple_disposition() {
        assert_eq!(
            content_disposition("track1.mp3"),
            "attachment; filename=track1.mp3"
        );
    }

    #[test]
    fn non_ascii_names_are_percent_encoded() {
        assert_eq!(
            content_disposition("café.mp3"),
            "attachment; filename*=UTF-8''caf%C3%A9.mp3"
        );
    }
}
