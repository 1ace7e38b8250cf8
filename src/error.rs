//! Error types for the edgequake-pdfparse library.
//!
//! Errors are layered the same way the pipeline is:
//!
//! * [`StorageError`]: a single read or write against a storage backend
//!   failed. Produced by [`crate::storage`], never retried there.
//! * [`InferenceError`]: opaque failure reported by an external collaborator
//!   (classifier, model backend, renderer). Propagated unchanged.
//! * [`EngineError`]: what collaborator methods that both compute and write
//!   return: either of the two above.
//! * [`ConfigurationError`]: the run cannot start at all and retrying will
//!   not help.
//! * [`ParseError`]: the fatal, top-level error returned by
//!   [`crate::Orchestrator::run`]. Carries the state or artifact that failed.
//!
//! The library never terminates the process. [`ParseError::exit_code`] maps
//! every error onto a documented code (see [`exit_code`]) so the binary, or
//! any other caller, can tell "fix your config" from "fix your input" from
//! "the backend is down".

use crate::config::Artifact;
use crate::orchestrator::RunState;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes used by [`ParseError::exit_code`].
///
/// Values follow `sysexits.h` so shell automation can branch on them.
pub mod exit_code {
    /// The requested parse method is not one of `auto`, `txt`, `ocr`.
    pub const UNKNOWN_METHOD: u8 = 64;
    /// The input document or request is malformed.
    pub const BAD_INPUT: u8 = 65;
    /// The input document or object does not exist.
    pub const NOT_FOUND: u8 = 66;
    /// The storage backend could not be reached.
    pub const BACKEND_UNAVAILABLE: u8 = 69;
    /// Inference failed or an internal invariant broke.
    pub const SOFTWARE: u8 = 70;
    /// The storage backend refused a write for lack of space or quota.
    pub const QUOTA_EXCEEDED: u8 = 73;
    /// The storage credential lacks permission.
    pub const ACCESS_DENIED: u8 = 77;
    /// No model backend is configured and no model list was supplied.
    pub const MISSING_MODEL_BACKEND: u8 = 78;
    /// The run was cancelled by the caller.
    pub const CANCELLED: u8 = 130;
}

// ── Storage ──────────────────────────────────────────────────────────────

/// Failure of a single storage operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist under the storage root.
    #[error("object '{key}' not found")]
    NotFound { key: String },

    /// The credential (or file-system user) lacks permission.
    #[error("access denied for '{key}': {detail}")]
    AccessDenied { key: String, detail: String },

    /// Transport or I/O failure talking to the backend.
    #[error("storage backend unavailable: {detail}")]
    BackendUnavailable { detail: String },

    /// The backend rejected a write because it is out of space or quota.
    #[error("storage quota exceeded writing '{key}': {detail}")]
    QuotaExceeded { key: String, detail: String },

    /// The key is empty, absolute, or escapes its root with `..`.
    #[error("invalid object key '{key}'")]
    InvalidKey { key: String },
}

impl StorageError {
    /// Exit code for this storage failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            StorageError::NotFound { .. } => exit_code::NOT_FOUND,
            StorageError::AccessDenied { .. } => exit_code::ACCESS_DENIED,
            StorageError::BackendUnavailable { .. } => exit_code::BACKEND_UNAVAILABLE,
            StorageError::QuotaExceeded { .. } => exit_code::QUOTA_EXCEEDED,
            StorageError::InvalidKey { .. } => exit_code::BAD_INPUT,
        }
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

/// Opaque failure from an external collaborator (classifier, model backend,
/// renderer, page normaliser).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InferenceError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl InferenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Error returned by collaborator methods that both compute and write.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl EngineError {
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Storage(e) => e.exit_code(),
            EngineError::Inference(_) => exit_code::SOFTWARE,
        }
    }
}

// ── Configuration ────────────────────────────────────────────────────────

/// The run cannot proceed and retrying will not help.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The method string is not `auto`, `txt`/`text`, or `ocr`.
    #[error("unknown parse method '{method}' (expected auto, txt or ocr)")]
    UnknownMethod { method: String },

    /// No model backend is configured and the request carries no model list.
    #[error(
        "no model backend is configured and no model list was supplied\n\
Configure an LLM provider (e.g. OPENAI_API_KEY) or pass --model-list <FILE>."
    )]
    MissingModelBackend,

    /// A provider was named explicitly but could not be instantiated.
    #[error("model provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },
}

impl ConfigurationError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ConfigurationError::UnknownMethod { .. } => exit_code::UNKNOWN_METHOD,
            ConfigurationError::MissingModelBackend
            | ConfigurationError::ProviderNotConfigured { .. } => exit_code::MISSING_MODEL_BACKEND,
        }
    }
}

// ── Top level ────────────────────────────────────────────────────────────

/// One artifact dump that failed.
#[derive(Debug)]
pub struct ArtifactFailure {
    pub artifact: Artifact,
    pub key: String,
    pub error: EngineError,
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.artifact, self.key, self.error)
    }
}

/// All fatal errors returned by [`crate::Orchestrator::run`] and the input
/// loaders.
#[derive(Debug, Error)]
pub enum ParseError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string, or a request field, is unusable.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a PDF.
    #[error("'{source_name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    /// The requested page window ends before it starts.
    #[error("Invalid page window: end page {end} is before start page {start}")]
    InvalidPageWindow { start: usize, end: usize },

    // ── Configuration ─────────────────────────────────────────────────────
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    // ── Collaborators ─────────────────────────────────────────────────────
    /// A collaborator failed during the given state.
    #[error("{state} failed: {source}")]
    Inference {
        state: RunState,
        #[source]
        source: InferenceError,
    },

    /// A storage operation outside the dump sequence failed.
    #[error("{state}: storage failure on '{target}': {source}")]
    Storage {
        state: RunState,
        target: String,
        #[source]
        source: StorageError,
    },

    /// One or more enabled artifacts could not be written.
    #[error(
        "{count} of {attempted} artifact dumps failed; first: {first}",
        count = .failures.len(),
        first = DisplayFirst(.failures)
    )]
    Dump {
        failures: Vec<ArtifactFailure>,
        attempted: usize,
    },

    /// The caller cancelled the run; it stopped before entering `state`.
    #[error("run cancelled before {state}")]
    Cancelled { state: RunState },

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

struct DisplayFirst<'a>(&'a [ArtifactFailure]);

impl fmt::Display for DisplayFirst<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.first() {
            Some(first) => first.fmt(f),
            None => f.write_str("none"),
        }
    }
}

impl ParseError {
    /// The documented process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            ParseError::FileNotFound { .. } => exit_code::NOT_FOUND,
            ParseError::PermissionDenied { .. } => exit_code::ACCESS_DENIED,
            ParseError::InvalidInput { .. }
            | ParseError::NotAPdf { .. }
            | ParseError::InvalidPageWindow { .. } => exit_code::BAD_INPUT,
            ParseError::DownloadFailed { .. } | ParseError::DownloadTimeout { .. } => {
                exit_code::BACKEND_UNAVAILABLE
            }
            ParseError::Configuration(e) => e.exit_code(),
            ParseError::Inference { .. } | ParseError::Internal(_) => exit_code::SOFTWARE,
            ParseError::Storage { source, .. } => source.exit_code(),
            ParseError::Dump { failures, .. } => failures
                .first()
                .map(|f| f.error.exit_code())
                .unwrap_or(exit_code::SOFTWARE),
            ParseError::Cancelled { .. } => exit_code::CANCELLED,
        }
    }

    /// The failed artifacts when this is a dump failure, otherwise empty.
    pub fn artifact_failures(&self) -> &[ArtifactFailure] {
        match self {
            ParseError::Dump { failures, .. } => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_have_distinct_exit_codes() {
        let unknown = ParseError::from(ConfigurationError::UnknownMethod {
            method: "bogus".into(),
        });
        let missing = ParseError::from(ConfigurationError::MissingModelBackend);
        assert_eq!(unknown.exit_code(), exit_code::UNKNOWN_METHOD);
        assert_eq!(missing.exit_code(), exit_code::MISSING_MODEL_BACKEND);
        assert_ne!(unknown.exit_code(), missing.exit_code());
        assert_ne!(unknown.exit_code(), 1);
    }

    #[test]
    fn unknown_method_display_names_the_method() {
        let e = ConfigurationError::UnknownMethod {
            method: "bogus".into(),
        };
        assert!(e.to_string().contains("'bogus'"), "got: {e}");
    }

    #[test]
    fn dump_failure_reports_first_artifact_and_storage_code() {
        let e = ParseError::Dump {
            failures: vec![ArtifactFailure {
                artifact: Artifact::Markdown,
                key: "doc.md".into(),
                error: EngineError::Storage(StorageError::QuotaExceeded {
                    key: "doc.md".into(),
                    detail: "bucket full".into(),
                }),
            }],
            attempted: 5,
        };
        let msg = e.to_string();
        assert!(msg.contains("1 of 5"), "got: {msg}");
        assert!(msg.contains("doc.md"), "got: {msg}");
        assert_eq!(e.exit_code(), exit_code::QUOTA_EXCEEDED);
        assert_eq!(e.artifact_failures().len(), 1);
    }

    #[test]
    fn storage_codes_distinguish_backend_from_permissions() {
        let down = StorageError::BackendUnavailable {
            detail: "connection refused".into(),
        };
        let denied = StorageError::AccessDenied {
            key: "k".into(),
            detail: "403".into(),
        };
        assert_eq!(down.exit_code(), exit_code::BACKEND_UNAVAILABLE);
        assert_eq!(denied.exit_code(), exit_code::ACCESS_DENIED);
    }

    #[test]
    fn inference_error_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::other("disk gone");
        let e = InferenceError::with_source("render failed", io);
        assert_eq!(e.message(), "render failed");
        assert!(e.source().is_some());
    }
}
