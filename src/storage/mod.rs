//! Byte-addressable storage behind one interface.
//!
//! [`StorageReader`] and [`StorageWriter`] are implemented by
//! [`LocalStorage`] (a directory on disk) and [`ObjectStorage`] (a key prefix
//! in an S3-compatible bucket). The orchestrator only ever sees the traits,
//! so a run behaves identically on either backend.
//!
//! Both implementations share the same contract:
//!
//! * keys are relative to the root the reader/writer was built for;
//! * `read` is `read_range` over [`ByteRange::FULL`];
//! * a range that runs past the end of the object returns the available
//!   suffix, an offset at or past the end returns an empty buffer;
//! * `write` replaces the whole object, there is no append;
//! * nothing is retried here, retry policy belongs to the caller.

pub mod local;
pub mod object;

pub use local::LocalStorage;
pub use object::ObjectStorage;

use crate::config::StorageEndpoint;
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;
use std::sync::Arc;

/// A byte window inside an object. `length == 0` means "to the end".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// The whole object.
    pub const FULL: ByteRange = ByteRange {
        offset: 0,
        length: 0,
    };

    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn is_full(&self) -> bool {
        self.offset == 0 && self.length == 0
    }

    /// The concrete span inside an object of `size` bytes. May be empty.
    pub fn clamp(&self, size: u64) -> Range<u64> {
        let start = self.offset.min(size);
        let end = if self.length == 0 {
            size
        } else {
            self.offset.saturating_add(self.length).min(size)
        };
        start..end
    }
}

/// Reads whole objects or byte ranges from keys under a storage root.
#[async_trait]
pub trait StorageReader: Send + Sync {
    /// Read the whole object.
    async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        self.read_range(key, ByteRange::FULL).await
    }

    /// Read `range` of the object. Short reads at end-of-object are not errors.
    async fn read_range(&self, key: &str, range: ByteRange) -> Result<Bytes, StorageError>;
}

/// Writes whole objects to keys under a storage root.
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Replace the object at `key` with `data`.
    ///
    /// A failed write leaves the prior content of `key` unspecified.
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;
}

/// Builds readers and writers rooted at a prefix.
///
/// Each call returns a fresh instance that owns its own handle/connection
/// state, so concurrent runs never share one.
pub trait StorageProvider: Send + Sync {
    fn reader(&self, root: &str) -> Result<Arc<dyn StorageReader>, StorageError>;
    fn writer(&self, root: &str) -> Result<Arc<dyn StorageWriter>, StorageError>;
}

/// The backend a run writes to, selected once at construction.
#[derive(Debug, Clone)]
pub enum StorageTarget {
    /// Roots are directories on the local file system.
    Local,
    /// Roots are key prefixes in the endpoint's bucket.
    ObjectStore(StorageEndpoint),
}

impl StorageProvider for StorageTarget {
    fn reader(&self, root: &str) -> Result<Arc<dyn StorageReader>, StorageError> {
        Ok(match self {
            StorageTarget::Local => Arc::new(LocalStorage::new(root)),
            StorageTarget::ObjectStore(endpoint) => Arc::new(ObjectStorage::connect(endpoint, root)?),
        })
    }

    fn writer(&self, root: &str) -> Result<Arc<dyn StorageWriter>, StorageError> {
        Ok(match self {
            StorageTarget::Local => Arc::new(LocalStorage::new(root)),
            StorageTarget::ObjectStore(endpoint) => Arc::new(ObjectStorage::connect(endpoint, root)?),
        })
    }
}

/// Reject keys that are empty, absolute, or climb out of the root.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let invalid = key.is_empty()
        || key.starts_with('/')
        || key.starts_with('\\')
        || key.split(['/', '\\']).any(|seg| seg == "..");
    if invalid {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Content type declared on upload, from the key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let ext = key.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("md") => "text/markdown",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Quota/space exhaustion markers seen in S3, MinIO and OS error messages.
pub(crate) fn looks_like_quota(detail: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "QuotaExceeded",
        "XMinioStorageFull",
        "XMinioAdminBucketQuotaExceeded",
        "EntityTooLarge",
        "No space left",
    ];
    MARKERS.iter().any(|m| detail.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_covers_object() {
        assert!(ByteRange::FULL.is_full());
        assert_eq!(ByteRange::FULL.clamp(10), 0..10);
    }

    #[test]
    fn range_past_end_is_truncated() {
        assert_eq!(ByteRange::new(4, 100).clamp(10), 4..10);
        assert_eq!(ByteRange::new(2, 3).clamp(10), 2..5);
        assert!(ByteRange::new(10, 3).clamp(10).is_empty());
        assert!(ByteRange::new(50, 0).clamp(10).is_empty());
    }

    #[test]
    fn range_does_not_overflow() {
        assert_eq!(ByteRange::new(u64::MAX - 1, u64::MAX).clamp(8), 8..8);
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("doc.md").is_ok());
        assert!(validate_key("images/p0001_b000.png").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/../../b").is_err());
        assert!(validate_key("a..b").is_ok());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("doc.md"), "text/markdown");
        assert_eq!(content_type_for("doc_middle.json"), "application/json");
        assert_eq!(content_type_for("doc_origin.PDF"), "application/pdf");
        assert_eq!(content_type_for("p0001_b000.png"), "image/png");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }

    #[test]
    fn quota_markers() {
        assert!(looks_like_quota("Error: XMinioStorageFull: Storage backend has reached its minimum free drive threshold"));
        assert!(looks_like_quota("No space left on device (os error 28)"));
        assert!(!looks_like_quota("connection refused"));
    }
}
