//! S3-compatible backend: keys live under a prefix inside one bucket.
//!
//! Transport, signing and addressing are delegated to [`object_store`].
//! Ranged reads issue a HEAD first so the requested window can be clamped to
//! the object size; a range past the end then yields the available suffix
//! instead of an `InvalidRange` error from the server.

use super::{content_type_for, validate_key, ByteRange, StorageReader, StorageWriter};
use crate::config::{AddressingStyle, StorageEndpoint};
use crate::error::StorageError;
use crate::paths;
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Region sent when the endpoint does not care (MinIO, Ceph, …).
const DEFAULT_REGION: &str = "us-east-1";

/// Reader and writer over `bucket/prefix/…`.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("store", &self.store.to_string())
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStorage {
    /// Build a client for `endpoint` rooted at `prefix`. No request is sent.
    pub fn connect(endpoint: &StorageEndpoint, prefix: &str) -> Result<Self, StorageError> {
        let store = AmazonS3Builder::new()
            .with_bucket_name(&endpoint.bucket)
            .with_access_key_id(&endpoint.access_key)
            .with_secret_access_key(&endpoint.secret_key)
            .with_endpoint(endpoint.endpoint())
            .with_region(DEFAULT_REGION)
            .with_allow_http(true)
            .with_virtual_hosted_style_request(endpoint.addressing_style == AddressingStyle::Virtual)
            .build()
            .map_err(|e| StorageError::BackendUnavailable {
                detail: format!("invalid S3 endpoint '{}': {e}", endpoint.endpoint_url),
            })?;
        Ok(Self::from_store(Arc::new(store), prefix))
    }

    /// Wrap an existing store, e.g. `object_store::memory::InMemory` in tests.
    pub fn from_store(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn location(&self, key: &str) -> Result<ObjectPath, StorageError> {
        validate_key(key)?;
        Ok(ObjectPath::from(paths::join(&self.prefix, key)))
    }
}

#[async_trait]
impl StorageReader for ObjectStorage {
    async fn read_range(&self, key: &str, range: ByteRange) -> Result<Bytes, StorageError> {
        let location = self.location(key)?;

        if range.is_full() {
            let result = self
                .store
                .get(&location)
                .await
                .map_err(|e| map_store_error(key, e))?;
            return result.bytes().await.map_err(|e| map_store_error(key, e));
        }

        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| map_store_error(key, e))?;
        let span = range.clamp(meta.size as u64);
        if span.is_empty() {
            return Ok(Bytes::new());
        }

        let data = self
            .store
            .get_range(&location, span.start as usize..span.end as usize)
            .await
            .map_err(|e| map_store_error(key, e))?;
        debug!("read {} bytes from {}", data.len(), location);
        Ok(data)
    }
}

#[async_trait]
impl StorageWriter for ObjectStorage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let location = self.location(key)?;

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type_for(key).into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(Bytes::copy_from_slice(data)), options)
            .await
            .map_err(|e| map_store_error(key, e))?;
        debug!("wrote {} bytes to {}", data.len(), location);
        Ok(())
    }
}

/// Map an `object_store` error onto the storage taxonomy.
///
/// HTTP 401/403 arrive as typed variants. Quota and the remaining denial
/// reasons are read from the S3 `<Code>` element or the response status,
/// never from free text: the message also carries the request URL, which
/// contains the document name.
fn map_store_error(key: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound {
            key: key.to_string(),
        },
        object_store::Error::PermissionDenied { .. } | object_store::Error::Unauthenticated { .. } => {
            StorageError::AccessDenied {
                key: key.to_string(),
                detail: e.to_string(),
            }
        }
        other => {
            let detail = other.to_string();
            let code = s3_error_code(&detail);
            let status = http_status(&detail);
            if code.is_some_and(|c| QUOTA_CODES.contains(&c)) || status == Some(507) {
                StorageError::QuotaExceeded {
                    key: key.to_string(),
                    detail,
                }
            } else if code.is_some_and(|c| DENIED_CODES.contains(&c)) || matches!(status, Some(401 | 403)) {
                StorageError::AccessDenied {
                    key: key.to_string(),
                    detail,
                }
            } else {
                StorageError::BackendUnavailable { detail }
            }
        }
    }
}

const QUOTA_CODES: [&str; 4] = [
    "QuotaExceeded",
    "XMinioStorageFull",
    "XMinioAdminBucketQuotaExceeded",
    "EntityTooLarge",
];

const DENIED_CODES: [&str; 4] = [
    "AccessDenied",
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "AllAccessDisabled",
];

/// The `<Code>` element of an S3 XML error body.
fn s3_error_code(detail: &str) -> Option<&str> {
    let (_, rest) = detail.split_once("<Code>")?;
    let (code, _) = rest.split_once("</Code>")?;
    Some(code.trim())
}

/// The status in `object_store`'s "... with status 403 Forbidden: ..." text.
fn http_status(detail: &str) -> Option<u16> {
    let (_, rest) = detail.split_once("with status ")?;
    rest.get(..3)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory(prefix: &str) -> (Arc<InMemory>, ObjectStorage) {
        let store = Arc::new(InMemory::new());
        let storage = ObjectStorage::from_store(store.clone(), prefix);
        (store, storage)
    }

    #[tokio::test]
    async fn keys_are_placed_under_prefix() {
        let (store, storage) = memory("/out/doc/auto/");
        storage.write("doc.md", b"# hi").await.unwrap();
        let raw = store
            .get(&ObjectPath::from("out/doc/auto/doc.md"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&raw[..], b"# hi");
    }

    #[tokio::test]
    async fn content_type_is_declared() {
        let (store, storage) = memory("p");
        storage.write("doc_middle.json", b"{}").await.unwrap();
        let result = store.get(&ObjectPath::from("p/doc_middle.json")).await.unwrap();
        assert_eq!(
            result
                .attributes
                .get(&Attribute::ContentType)
                .map(|v| AsRef::<str>::as_ref(v)),
            Some("application/json")
        );
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_, storage) = memory("p");
        let err = storage.read("nope.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        let err = storage.read_range("nope.pdf", ByteRange::new(1, 2)).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[test]
    fn connect_builds_without_network() {
        let ep = StorageEndpoint::new("bucket", "ak", "sk", "127.0.0.1:9000")
            .with_addressing_style(AddressingStyle::Path);
        let storage = ObjectStorage::connect(&ep, "root/").unwrap();
        assert_eq!(storage.prefix(), "root");
    }

    fn generic(message: &str) -> object_store::Error {
        object_store::Error::Generic {
            store: "S3",
            source: message.to_string().into(),
        }
    }

    #[test]
    fn error_codes_and_status_are_classified() {
        let err = map_store_error(
            "doc.md",
            generic("Client error with status 403 Forbidden: <Error><Code>AccessDenied</Code></Error>"),
        );
        assert!(matches!(err, StorageError::AccessDenied { .. }));

        let err = map_store_error(
            "doc.md",
            generic("Server error, body contains Error, with status 200 OK: <Code>XMinioStorageFull</Code>"),
        );
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(err.exit_code(), 73);

        let err = map_store_error(
            "doc.md",
            object_store::Error::PermissionDenied {
                path: "b/doc.md".to_string(),
                source: "forbidden".to_string().into(),
            },
        );
        assert_eq!(err.exit_code(), 77);
    }

    #[test]
    fn document_name_in_url_does_not_classify_outage() {
        for name in ["invoice-403", "Forbidden-report", "QuotaExceeded", "AccessDenied"] {
            let err = map_store_error(
                &format!("{name}.md"),
                generic(&format!(
                    "Error performing PUT http://minio:9000/b/out/{name}/auto/{name}.md in 1.2s: \
                     error sending request: connection refused"
                )),
            );
            assert!(matches!(err, StorageError::BackendUnavailable { .. }), "name {name}");
            assert_eq!(err.exit_code(), 69);
        }
    }

    #[test]
    fn status_parsing() {
        assert_eq!(http_status("Client error with status 401 Unauthorized: x"), Some(401));
        assert_eq!(http_status("connection refused"), None);
        assert_eq!(s3_error_code("<Error><Code> AccessDenied </Code></Error>"), Some("AccessDenied"));
        assert_eq!(s3_error_code("no xml"), None);
    }
}
