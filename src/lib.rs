//! # edgequake-pdfparse
//!
//! Parse PDF documents into Markdown and structured JSON artifacts, written
//! to a local directory or an S3-compatible bucket.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ Init      method, page window, backend check; keep requested pages
//!  ├─ Classify  auto → text layer density decides TEXT or OCR
//!  ├─ Infer     supplied model list, or the model backend
//!  ├─ Pipe      text-mode or OCR-mode post-processing, images written
//!  └─ Dump      <name>.md, _middle.json, _model.json, _origin.pdf,
//!               _content_list.json under <root>/<name>/<method>/
//! ```
//!
//! The [`Orchestrator`] only talks to traits: [`StorageReader`] /
//! [`StorageWriter`] for I/O, and the collaborator traits in [`engine`] for
//! classification and inference. [`engine`] also provides pdfium and
//! vision-LLM implementations of every collaborator.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfparse::engine::vlm::{VlmBackend, VlmSettings};
//! use edgequake_pdfparse::{Orchestrator, ParseRequest, StorageTarget};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = VlmBackend::from_env(VlmSettings::default())?;
//!     let orchestrator = Orchestrator::builder()
//!         .maybe_backend(backend.map(|b| Arc::new(b) as _))
//!         .build();
//!
//!     let pdf = std::fs::read("paper.pdf")?;
//!     let request = ParseRequest::builder("paper", pdf).method("auto").build();
//!     let report = orchestrator.run(&request, &StorageTarget::Local).await?;
//!     eprintln!("wrote {} artifacts to {}", report.artifacts.len(), report.prefixes.artifact_prefix);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfparse` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod orchestrator;
pub mod paths;
pub mod progress;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AddressingStyle, Artifact, DumpFlags, DumpPolicy, MarkdownMode, PageWindow, ParseMethod,
    ParseMode, ParseRequest, ParseRequestBuilder, StorageEndpoint,
};
pub use error::{
    ArtifactFailure, ConfigurationError, EngineError, InferenceError, ParseError, StorageError,
};
pub use input::{load_document, LoadedDocument};
pub use orchestrator::{
    ArtifactRecord, CancelHandle, CancelToken, Orchestrator, OrchestratorBuilder, RunReport,
    RunState,
};
pub use paths::OutputPrefixes;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use storage::{
    ByteRange, LocalStorage, ObjectStorage, StorageProvider, StorageReader, StorageTarget,
    StorageWriter,
};
