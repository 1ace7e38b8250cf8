//! Input loading: turn a user-supplied path, URL or `s3://` location into
//! a document name and its bytes.
//!
//! | form | source |
//! |---|---|
//! | `http://…`, `https://…` | downloaded with `reqwest` |
//! | `s3://bucket/key` | read through [`StorageReader`] on the given endpoint |
//! | anything else | local file |
//!
//! The document name is the file stem of the last path segment. Bytes are
//! checked for the `%PDF` magic before they are returned.

use crate::config::StorageEndpoint;
use crate::error::{ParseError, StorageError};
use crate::storage::{ObjectStorage, StorageReader};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A document ready to become a [`crate::ParseRequest`].
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub name: String,
    pub bytes: Bytes,
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Split `s3://bucket/key` into `(bucket, key)`.
pub fn parse_s3_uri(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix("s3://")?;
    let (bucket, key) = rest.split_once('/')?;
    (!bucket.is_empty() && !key.is_empty()).then_some((bucket, key))
}

/// Load `input` into memory.
///
/// `endpoint` is required for `s3://` inputs; its bucket is replaced by the
/// one named in the URI.
pub async fn load_document(
    input: &str,
    timeout_secs: u64,
    endpoint: Option<&StorageEndpoint>,
) -> Result<LoadedDocument, ParseError> {
    let (name, bytes) = if is_url(input) {
        (name_from_url(input), download_url(input, timeout_secs).await?)
    } else if input.starts_with("s3://") {
        read_s3(input, endpoint).await?
    } else {
        let path = PathBuf::from(input);
        (name_from_path(&path), read_local(&path).await?)
    };

    check_magic(input, &bytes)?;
    if name.is_empty() {
        return Err(ParseError::InvalidInput {
            input: input.to_string(),
            reason: "cannot derive a document name".to_string(),
        });
    }
    debug!("Loaded '{}' ({} bytes)", name, bytes.len());
    Ok(LoadedDocument { name, bytes })
}

fn check_magic(source_name: &str, bytes: &[u8]) -> Result<(), ParseError> {
    if bytes.starts_with(PDF_MAGIC) {
        Ok(())
    } else {
        Err(ParseError::NotAPdf {
            source_name: source_name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}

/// File stem of `path`, e.g. `reports/q3.final.pdf` → `q3.final`.
pub fn name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn name_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty())
        .map(|last| name_from_path(Path::new(&last)))
        .unwrap_or_else(|| "downloaded".to_string())
}

async fn read_local(path: &Path) -> Result<Bytes, ParseError> {
    match tokio::fs::read(path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(ParseError::PermissionDenied {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ParseError::FileNotFound {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(ParseError::InvalidInput {
            input: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

async fn read_s3(
    input: &str,
    endpoint: Option<&StorageEndpoint>,
) -> Result<(String, Bytes), ParseError> {
    let (bucket, key) = parse_s3_uri(input).ok_or_else(|| ParseError::InvalidInput {
        input: input.to_string(),
        reason: "expected s3://<bucket>/<key>".to_string(),
    })?;
    let endpoint = endpoint.ok_or_else(|| ParseError::InvalidInput {
        input: input.to_string(),
        reason: "s3:// input needs an endpoint (--s3-endpoint, --s3-access-key, --s3-secret-key)"
            .to_string(),
    })?;
    let endpoint = StorageEndpoint {
        bucket: bucket.to_string(),
        ..endpoint.clone()
    };

    info!("Reading s3://{}/{}", bucket, key);
    let reader = ObjectStorage::connect(&endpoint, "").map_err(|e| s3_error(input, e))?;
    let bytes = reader.read(key).await.map_err(|e| s3_error(input, e))?;
    Ok((name_from_path(Path::new(key)), bytes))
}

fn s3_error(input: &str, source: StorageError) -> ParseError {
    match source {
        StorageError::NotFound { .. } => ParseError::FileNotFound {
            path: PathBuf::from(input),
        },
        StorageError::AccessDenied { .. } => ParseError::PermissionDenied {
            path: PathBuf::from(input),
        },
        other => ParseError::DownloadFailed {
            url: input.to_string(),
            reason: other.to_string(),
        },
    }
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Bytes, ParseError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ParseError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let timeout_or = |e: reqwest::Error| {
        if e.is_timeout() {
            ParseError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ParseError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(timeout_or)?;
    if !response.status().is_success() {
        return Err(ParseError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    let bytes = response.bytes().await.map_err(timeout_or)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn url_detection() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("s3://bucket/doc.pdf"));
        assert!(!is_url("doc.pdf"));
    }

    #[test]
    fn s3_uri_parsing() {
        assert_eq!(parse_s3_uri("s3://b/dir/x.pdf"), Some(("b", "dir/x.pdf")));
        assert_eq!(parse_s3_uri("s3://b/"), None);
        assert_eq!(parse_s3_uri("s3:///x.pdf"), None);
        assert_eq!(parse_s3_uri("/tmp/x.pdf"), None);
    }

    #[test]
    fn names() {
        assert_eq!(name_from_path(Path::new("a/b/report.v2.pdf")), "report.v2");
        assert_eq!(name_from_url("https://arxiv.org/pdf/2401.00001.pdf"), "2401.00001");
        assert_eq!(name_from_url("https://example.com/"), "downloaded");
    }

    #[tokio::test]
    async fn local_pdf_loads() {
        let mut tmp = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.7\n%%EOF").unwrap();
        let doc = load_document(tmp.path().to_str().unwrap(), 5, None).await.unwrap();
        assert_eq!(doc.name, name_from_path(tmp.path()));
        assert!(doc.bytes.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn non_pdf_is_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"GIF89a").unwrap();
        let err = load_document(tmp.path().to_str().unwrap(), 5, None).await.unwrap_err();
        assert!(matches!(err, ParseError::NotAPdf { ref magic, .. } if magic == b"GIF8"));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = load_document("/definitely/not/here.pdf", 5, None).await.unwrap_err();
        assert!(matches!(err, ParseError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn s3_without_endpoint_is_invalid() {
        let err = load_document("s3://bucket/doc.pdf", 5, None).await.unwrap_err();
        assert!(matches!(err, ParseError::InvalidInput { .. }));
    }
}
