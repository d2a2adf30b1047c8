//! The object-store seam: a remote (or local) bucket addressed by filename.
//!
//! The file service only ever talks to `dyn ObjectStore`; the concrete
//! backend is picked once at startup.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use thiserror::Error;

/// Body of a downloaded object, yielded in chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Opaque identity of a stored object as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHandle {
    /// Backend-specific id (B2 file id, or the relative path on disk).
    pub id: String,

    /// Name the object is stored under.
    pub name: String,

    /// Size in bytes, when the backend reports it.
    pub content_length: Option<u64>,
}

/// An opened object. `content_length` describes exactly the bytes `stream`
/// yields, which may differ from the length seen at lookup time if the
/// object was replaced in between.
pub struct ObjectBody {
    pub content_length: Option<u64>,
    pub stream: ByteStream,
}

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object name `{0}` is not accepted by the store")]
    InvalidName(String),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("object store returned {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("object store request failed: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectStoreError::NotFound(_))
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Byte storage keyed by name.
///
/// Implementations are shared by every in-flight request and must be safe
/// for concurrent use.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `name`, silently replacing any existing object.
    async fn upload(&self, name: &str, data: Bytes) -> ObjectStoreResult<ObjectHandle>;

    /// Resolve the current object stored under `name`.
    async fn lookup_by_name(&self, name: &str) -> ObjectStoreResult<ObjectHandle>;

    /// Open the bytes of a previously resolved object.
    async fn download(&self, handle: &ObjectHandle) -> ObjectStoreResult<ObjectBody>;

    /// Cheap check used by the readiness endpoint.
    async fn check_ready(&self) -> ObjectStoreResult<()>;

    /// Release held credentials and connections. Called once after the
    /// server stops accepting requests.
    async fn shutdown(&self);
}
