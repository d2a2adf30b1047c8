//! LocalObjectStore: object payloads on local disk, sharded beneath
//! `base_path/{shard}/{shard}/{name}`.
//!
//! Used for development and tests in place of the B2 bucket. Writes go to a
//! temporary file which is fsynced and then renamed over the final path, so
//! a reader never observes a half-written object.

use crate::services::object_store::{
    ObjectBody, ObjectHandle, ObjectStore, ObjectStoreError, ObjectStoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MAX_OBJECT_NAME_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    /// Root directory holding every object.
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Create the root directory if needed.
    pub async fn open(base_path: impl Into<PathBuf>) -> ObjectStoreResult<Self> {
        let store = Self::new(base_path);
        fs::create_dir_all(&store.base_path).await?;
        Ok(store)
    }

    /// Reject names that could escape `base_path` or confuse the filesystem.
    fn ensure_name_safe(name: &str) -> ObjectStoreResult<()> {
        let invalid = || ObjectStoreError::InvalidName(name.to_string());
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(invalid());
        }
        if name.starts_with('/') || name.contains("..") {
            return Err(invalid());
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(invalid());
        }
        Ok(())
    }

    /// Two-level shard directories from MD5(name), as lowercase hex bytes.
    fn shards(name: &str) -> (String, String) {
        let digest = md5::compute(name);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Path of an object relative to `base_path`.
    fn relative_path(name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(name);
        [shard_a.as_str(), shard_b.as_str(), name].iter().collect()
    }

    fn handle_for(name: &str, content_length: u64) -> ObjectHandle {
        ObjectHandle {
            id: Self::relative_path(name).to_string_lossy().into_owned(),
            name: name.to_string(),
            content_length: Some(content_length),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, name: &str, data: Bytes) -> ObjectStoreResult<ObjectHandle> {
        Self::ensure_name_safe(name)?;

        let file_path = self.base_path.join(Self::relative_path(name));
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("object path missing parent"))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let write = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<_, io::Error>(())
        };
        if let Err(err) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }

        debug!("stored {} bytes at {}", data.len(), file_path.display());
        Ok(Self::handle_for(name, data.len() as u64))
    }

    async fn lookup_by_name(&self, name: &str) -> ObjectStoreResult<ObjectHandle> {
        Self::ensure_name_safe(name)?;
        let file_path = self.base_path.join(Self::relative_path(name));
        match fs::metadata(&file_path).await {
            Ok(meta) if meta.is_file() => Ok(Self::handle_for(name, meta.len())),
            Ok(_) => Err(ObjectStoreError::NotFound(name.to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn download(&self, handle: &ObjectHandle) -> ObjectStoreResult<ObjectBody> {
        let file = File::open(self.base_path.join(&handle.id))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    ObjectStoreError::NotFound(handle.name.clone())
                } else {
                    ObjectStoreError::Io(err)
                }
            })?;
        // Length of the opened file, not of the path: a concurrent upload
        // renames a new file over the path but this descriptor keeps the old one.
        let length = file.metadata().await?.len();
        Ok(ObjectBody {
            content_length: Some(length),
            stream: ReaderStream::new(file).boxed(),
        })
    }

    /// Write, read back and delete a scratch file under the root.
    async fn check_ready(&self) -> ObjectStoreResult<()> {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(io::Error::new(ErrorKind::InvalidData, "file content mismatch").into());
        }
        Ok(())
    }

    async fn shutdown(&self) {
        debug!("local object store at {} closed", self.base_path.display());
    }
}
