//! Represents one uploaded file's entry in the metadata index.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row of the `file_paths` table.
///
/// The record only proves that an upload completed; the bytes themselves
/// live in the object store under the same `filename`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct FileRecord {
    /// Surrogate key assigned by SQLite on insert.
    pub id: i64,

    /// Unique name the file was uploaded under.
    pub filename: String,
}

/// Body returned by `GET /files/`.
#[derive(Serialize, Deserialize, Debug)]
pub struct FileListing {
    pub files: Vec<FileRecord>,
}

/// Body returned by a successful `POST /upload/`.
#[derive(Serialize, Deserialize, Debug)]
pub struct UploadReceipt {
    pub message: String,
    pub id: i64,
}

impl From<&FileRecord> for UploadReceipt {
    fn from(record: &FileRecord) -> Self {
        Self {
            message: format!("File '{}' uploaded successfully!", record.filename),
            id: record.id,
        }
    }
}
