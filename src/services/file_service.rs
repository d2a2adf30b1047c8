//! src/services/file_service.rs
//!
//! FileService performs a non-transactional two-step write (object store
//! first, then the SQLite index) and two reads: object fetch by name and
//! index listing.
//!
//! Re-uploading a name that is already indexed is rejected before the object
//! store is touched. Two concurrent uploads of the same new name can still
//! both reach the object store; the unique index then keeps exactly one
//! record and the losing request reports `DuplicateRecord`.

use crate::{
    models::file_record::FileRecord,
    services::object_store::{ByteStream, ObjectStore, ObjectStoreError},
};
use bytes::Bytes;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error("filename must not be empty")]
    InvalidFilename,
    #[error("failed to store file bytes: {0}")]
    UpstreamWrite(#[source] ObjectStoreError),
    #[error("file `{0}` already exists")]
    DuplicateRecord(String),
    #[error("file `{name}` not found")]
    NotFound {
        name: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type FileResult<T> = Result<T, FileServiceError>;

/// A file ready to be streamed back to a client.
pub struct Download {
    pub filename: String,
    /// Fixed media type declared for every download.
    pub content_type: String,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

#[derive(Clone)]
pub struct FileService {
    /// Shared SQLite pool; each operation checks out its own connection.
    pub db: Arc<SqlitePool>,

    /// Process-wide object store client, authorized before the service is built.
    pub objects: Arc<dyn ObjectStore>,

    download_content_type: String,
}

impl FileService {
    pub fn new(
        db: Arc<SqlitePool>,
        objects: Arc<dyn ObjectStore>,
        download_content_type: impl Into<String>,
    ) -> Self {
        Self {
            db,
            objects,
            download_content_type: download_content_type.into(),
        }
    }

    /// Store `content` under `filename` and index it.
    ///
    /// The object store write happens first; if the insert then fails the
    /// bytes stay in the object store.
    pub async fn upload(&self, filename: &str, content: Bytes) -> FileResult<FileRecord> {
        if filename.is_empty() {
            return Err(FileServiceError::InvalidFilename);
        }

        // No pooled connection is held across the object store write.
        {
            let mut conn = self.db.acquire().await?;
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT id FROM file_paths WHERE filename = ?")
                    .bind(filename)
                    .fetch_optional(&mut *conn)
                    .await?;
            if existing.is_some() {
                return Err(FileServiceError::DuplicateRecord(filename.to_string()));
            }
        }

        let size = content.len();
        let handle = self
            .objects
            .upload(filename, content)
            .await
            .map_err(FileServiceError::UpstreamWrite)?;
        debug!("object {} stored as {} ({} bytes)", filename, handle.id, size);

        let mut conn = self.db.acquire().await?;
        sqlx::query_as::<_, FileRecord>(
            "INSERT INTO file_paths (filename) VALUES (?) RETURNING id, filename",
        )
        .bind(filename)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                FileServiceError::DuplicateRecord(filename.to_string())
            } else {
                FileServiceError::Database(err)
            }
        })
    }

    /// Resolve `filename` in the object store and open its bytes.
    ///
    /// The metadata index is not consulted.
    pub async fn download(&self, filename: &str) -> FileResult<Download> {
        if filename.is_empty() {
            return Err(FileServiceError::InvalidFilename);
        }

        let not_found = |source| FileServiceError::NotFound {
            name: filename.to_string(),
            source,
        };
        let handle = self
            .objects
            .lookup_by_name(filename)
            .await
            .map_err(not_found)?;
        let object = self.objects.download(&handle).await.map_err(not_found)?;

        Ok(Download {
            filename: filename.to_string(),
            content_type: self.download_content_type.clone(),
            content_length: object.content_length,
            body: object.stream,
        })
    }

    /// Every indexed file, in whatever order SQLite returns them.
    pub async fn list_files(&self) -> FileResult<Vec<FileRecord>> {
        let mut conn = self.db.acquire().await?;
        let files = sqlx::query_as::<_, FileRecord>("SELECT id, filename FROM file_paths")
            .fetch_all(&mut *conn)
            .await?;
        Ok(files)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
