//! Local file-system backend: keys are paths relative to a root directory.

use super::{looks_like_quota, validate_key, ByteRange, StorageReader, StorageWriter};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Reader and writer over a directory. The directory need not exist until
/// the first write.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageReader for LocalStorage {
    async fn read_range(&self, key: &str, range: ByteRange) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io_error(key, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| map_io_error(key, e))?
            .len();

        let span = range.clamp(size);
        if span.is_empty() {
            return Ok(Bytes::new());
        }

        file.seek(SeekFrom::Start(span.start))
            .await
            .map_err(|e| map_io_error(key, e))?;
        let want = span.end - span.start;
        let mut buf = Vec::with_capacity(want as usize);
        file.take(want)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| map_io_error(key, e))?;

        debug!("read {} bytes from {}", buf.len(), path.display());
        Ok(Bytes::from(buf))
    }
}

#[async_trait]
impl StorageWriter for LocalStorage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(key, e))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| map_io_error(key, e))?;
        debug!("wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

fn map_io_error(key: &str, e: std::io::Error) -> StorageError {
    match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound {
            key: key.to_string(),
        },
        ErrorKind::PermissionDenied | ErrorKind::ReadOnlyFilesystem => StorageError::AccessDenied {
            key: key.to_string(),
            detail: e.to_string(),
        },
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded | ErrorKind::FileTooLarge => {
            StorageError::QuotaExceeded {
                key: key.to_string(),
                detail: e.to_string(),
            }
        }
        _ if looks_like_quota(&e.to_string()) => StorageError::QuotaExceeded {
            key: key.to_string(),
            detail: e.to_string(),
        },
        _ => StorageError::BackendUnavailable {
            detail: format!("{key}: {e}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path().join("nested/root"));
        store.write("images/a.png", b"png").await.unwrap();
        assert!(dir.path().join("nested/root/images/a.png").exists());
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        let err = store.read("absent.md").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { key } if key == "absent.md"));
    }

    #[tokio::test]
    async fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path());
        let err = store.write("../outside.md", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[test]
    fn io_errors_map_to_taxonomy() {
        let e = map_io_error("k", std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(e, StorageError::AccessDenied { .. }));
        let e = map_io_error("k", std::io::Error::from(ErrorKind::StorageFull));
        assert!(matches!(e, StorageError::QuotaExceeded { .. }));
        let e = map_io_error("k", std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(matches!(e, StorageError::BackendUnavailable { .. }));
    }
}
