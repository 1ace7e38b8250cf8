//! Parse-run orchestration: classify → infer → pipe → dump.
//!
//! ```text
//! Init ──▶ Classify ──▶ Infer ──▶ Pipe ──▶ Dump ──▶ Done
//!  │          │           │         │        │
//!  │          │           │         │        └─ one write per enabled artifact
//!  │          │           │         └─ pipe_text_mode XOR pipe_ocr_mode
//!  │          │           └─ model list → loader, else model backend
//!  │          └─ method=auto → classifier, else the explicit method
//!  └─ method, page window, backend presence; page-window normalisation
//! ```
//!
//! Each state completes before the next starts and every side effect goes
//! through a [`StorageWriter`] built for this run. The mode chosen in
//! Classify is the only input to Pipe; nothing re-evaluates it.
//!
//! Configuration failures (unknown method, no model backend) are detected in
//! Init, before any normalisation, inference or write.

use crate::config::{Artifact, DumpPolicy, ParseMethod, ParseMode, ParseRequest};
use crate::engine::inference::JsonModelLoader;
use crate::engine::pdfium::{PdfiumPageWindow, TextLayerClassifier};
use crate::engine::{
    DocumentClassifier, InferenceOptions, InferenceResult, ModelBackend, ModelListLoader,
    PageNormalizer, PipeResult,
};
use crate::error::{ArtifactFailure, ConfigurationError, EngineError, ParseError, StorageError};
use crate::paths::{self, OutputPrefixes};
use crate::progress::ProgressCallback;
use crate::storage::{StorageProvider, StorageWriter};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// States of a parse run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunState {
    Init,
    Classify,
    Infer,
    Pipe,
    Dump,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Init => "init",
            RunState::Classify => "classify",
            RunState::Infer => "infer",
            RunState::Pipe => "pipe",
            RunState::Dump => "dump",
            RunState::Done => "done",
        })
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Requests cancellation of the runs holding the paired [`CancelToken`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked by the orchestrator at state boundaries and between dumps.
///
/// A run is never interrupted in the middle of a write.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A linked handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_, token) = Self::pair();
        token
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

// ── Report ───────────────────────────────────────────────────────────────

/// One artifact written by a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRecord {
    pub artifact: Artifact,
    pub key: String,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub method: ParseMethod,
    pub mode: ParseMode,
    pub prefixes: OutputPrefixes,
    pub artifacts: Vec<ArtifactRecord>,
    pub duration_ms: u64,
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Drives parse runs. Cheap to share: every collaborator is behind an `Arc`
/// and runs carry no state between them.
#[derive(Clone)]
pub struct Orchestrator {
    normalizer: Arc<dyn PageNormalizer>,
    classifier: Arc<dyn DocumentClassifier>,
    loader: Arc<dyn ModelListLoader>,
    backend: Option<Arc<dyn ModelBackend>>,
    dump_policy: DumpPolicy,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ModelBackend>"))
            .field("dump_policy", &self.dump_policy)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ParseProgressCallback>"))
            .finish()
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder {
            normalizer: None,
            classifier: None,
            loader: None,
            backend: None,
            dump_policy: DumpPolicy::default(),
            progress: None,
        }
    }

    /// Whether a model backend was configured at construction.
    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Run one request to completion.
    pub async fn run(
        &self,
        request: &ParseRequest,
        storage: &dyn StorageProvider,
    ) -> Result<RunReport, ParseError> {
        self.run_until(request, storage, &CancelToken::never()).await
    }

    /// Run one request, stopping at the next state boundary once `cancel`
    /// fires.
    pub async fn run_until(
        &self,
        request: &ParseRequest,
        storage: &dyn StorageProvider,
        cancel: &CancelToken,
    ) -> Result<RunReport, ParseError> {
        let started = Instant::now();

        // ── Init ─────────────────────────────────────────────────────────
        self.enter(RunState::Init, cancel)?;
        if request.debug {
            warn!("debug mode is on");
        }
        let method: ParseMethod = request.method.parse()?;
        validate_document_name(&request.document_name)?;
        request.pages.validate()?;
        if request.model_list.is_empty() && self.backend.is_none() {
            return Err(ConfigurationError::MissingModelBackend.into());
        }

        let pdf = self
            .normalizer
            .select_pages(request.pdf.clone(), request.pages.start, request.pages.end)
            .await
            .map_err(|source| ParseError::Inference {
                state: RunState::Init,
                source,
            })?;

        let prefixes = paths::resolve(&request.output_root, &request.document_name, method.as_str());
        let image_writer = storage
            .writer(&prefixes.image_prefix)
            .map_err(|source| storage_error(RunState::Init, &prefixes.image_prefix, source))?;
        let artifact_writer = storage
            .writer(&prefixes.artifact_prefix)
            .map_err(|source| storage_error(RunState::Init, &prefixes.artifact_prefix, source))?;
        info!(
            "Parsing '{}' ({} bytes, method {}) into {}",
            request.document_name,
            pdf.len(),
            method,
            prefixes.artifact_prefix
        );

        // ── Classify ─────────────────────────────────────────────────────
        self.enter(RunState::Classify, cancel)?;
        let mode = match method {
            ParseMethod::Txt => ParseMode::Text,
            ParseMethod::Ocr => ParseMode::Ocr,
            ParseMethod::Auto => {
                let mode = self
                    .classifier
                    .classify(&pdf)
                    .await
                    .map_err(|source| ParseError::Inference {
                        state: RunState::Classify,
                        source,
                    })?;
                info!("Classified '{}' as {}", request.document_name, mode);
                mode
            }
        };

        // ── Infer ────────────────────────────────────────────────────────
        self.enter(RunState::Infer, cancel)?;
        let inference: Box<dyn InferenceResult> = if !request.model_list.is_empty() {
            debug!("Using supplied model list ({} pages)", request.model_list.len());
            self.loader.load(&request.model_list, &pdf).await
        } else {
            let backend = self
                .backend
                .as_ref()
                .ok_or(ConfigurationError::MissingModelBackend)?;
            backend
                .analyze(&pdf, mode, &InferenceOptions::from(request))
                .await
        }
        .map_err(|source| ParseError::Inference {
            state: RunState::Infer,
            source,
        })?;

        // ── Pipe ─────────────────────────────────────────────────────────
        self.enter(RunState::Pipe, cancel)?;
        let lang = request.lang.as_deref();
        let piped = match mode {
            ParseMode::Text => {
                inference
                    .pipe_text_mode(image_writer.as_ref(), request.debug, lang)
                    .await
            }
            ParseMode::Ocr => {
                inference
                    .pipe_ocr_mode(image_writer.as_ref(), request.debug, lang)
                    .await
            }
        }
        .map_err(|e| match e {
            EngineError::Storage(source) => {
                storage_error(RunState::Pipe, &prefixes.image_prefix, source)
            }
            EngineError::Inference(source) => ParseError::Inference {
                state: RunState::Pipe,
                source,
            },
        })?;

        // ── Dump ─────────────────────────────────────────────────────────
        self.enter(RunState::Dump, cancel)?;
        let artifacts = self
            .dump(
                request,
                &prefixes,
                &pdf,
                inference.as_ref(),
                piped.as_ref(),
                artifact_writer.as_ref(),
                cancel,
            )
            .await?;

        // ── Done ─────────────────────────────────────────────────────────
        self.notify_state(RunState::Done);
        info!("output prefix is {}", prefixes.artifact_prefix);

        Ok(RunReport {
            method,
            mode,
            prefixes,
            artifacts,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Attempt every enabled dump in order, honouring the dump policy.
    #[allow(clippy::too_many_arguments)]
    async fn dump(
        &self,
        request: &ParseRequest,
        prefixes: &OutputPrefixes,
        pdf: &[u8],
        inference: &dyn InferenceResult,
        piped: &dyn PipeResult,
        writer: &dyn StorageWriter,
        cancel: &CancelToken,
    ) -> Result<Vec<ArtifactRecord>, ParseError> {
        let enabled = request.dump.enabled();
        let mut written = Vec::with_capacity(enabled.len());
        let mut failures: Vec<ArtifactFailure> = Vec::new();
        let mut cancelled = false;

        for artifact in enabled.iter().copied() {
            if cancel.is_cancelled() {
                info!("Run cancelled during dump after {} artifacts", written.len() + failures.len());
                cancelled = true;
                break;
            }

            let key = artifact.file_name(&request.document_name);
            let result = match artifact {
                Artifact::Markdown => {
                    piped
                        .dump_md(writer, &key, &prefixes.image_prefix, request.markdown_mode)
                        .await
                }
                Artifact::MiddleJson => piped.dump_middle_json(writer, &key).await,
                Artifact::ModelJson => inference.dump_model(writer, &key).await,
                Artifact::OriginPdf => writer.write(&key, pdf).await.map_err(EngineError::from),
                Artifact::ContentList => {
                    piped
                        .dump_content_list(writer, &key, &prefixes.image_prefix)
                        .await
                }
            };

            match result {
                Ok(()) => {
                    debug!("Dumped {} to {}/{}", artifact, prefixes.artifact_prefix, key);
                    if let Some(ref cb) = self.progress {
                        cb.on_artifact_written(artifact, &key);
                    }
                    written.push(ArtifactRecord { artifact, key });
                }
                Err(error) => {
                    warn!("Failed to dump {} to '{}': {}", artifact, key, error);
                    if let Some(ref cb) = self.progress {
                        cb.on_artifact_failed(artifact, &key, &error.to_string());
                    }
                    failures.push(ArtifactFailure {
                        artifact,
                        key,
                        error,
                    });
                    if self.dump_policy == DumpPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        if let Some(ref cb) = self.progress {
            cb.on_run_complete(written.len(), failures.len());
        }

        // Recorded failures take precedence over cancellation.
        if !failures.is_empty() {
            Err(ParseError::Dump {
                failures,
                attempted: enabled.len(),
            })
        } else if cancelled {
            Err(ParseError::Cancelled {
                state: RunState::Dump,
            })
        } else {
            Ok(written)
        }
    }

    fn enter(&self, state: RunState, cancel: &CancelToken) -> Result<(), ParseError> {
        if cancel.is_cancelled() {
            info!("Run cancelled before {}", state);
            return Err(ParseError::Cancelled { state });
        }
        debug!("Entering state {}", state);
        self.notify_state(state);
        Ok(())
    }

    fn notify_state(&self, state: RunState) {
        if let Some(ref cb) = self.progress {
            cb.on_state(state);
        }
    }
}

fn storage_error(state: RunState, target: &str, source: StorageError) -> ParseError {
    ParseError::Storage {
        state,
        target: target.to_string(),
        source,
    }
}

/// The document name becomes one path segment of every key.
fn validate_document_name(name: &str) -> Result<(), ParseError> {
    let reason = if name.trim().is_empty() {
        Some("document name is empty")
    } else if name.contains(['/', '\\']) {
        Some("document name must not contain path separators")
    } else if name == "." || name == ".." {
        Some("document name must not be '.' or '..'")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ParseError::InvalidInput {
            input: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Builder for [`Orchestrator`].
///
/// Unset collaborators fall back to the pdfium-based defaults. The model
/// backend has no default: leaving it unset means runs need a model list.
pub struct OrchestratorBuilder {
    normalizer: Option<Arc<dyn PageNormalizer>>,
    classifier: Option<Arc<dyn DocumentClassifier>>,
    loader: Option<Arc<dyn ModelListLoader>>,
    backend: Option<Arc<dyn ModelBackend>>,
    dump_policy: DumpPolicy,
    progress: Option<ProgressCallback>,
}

impl OrchestratorBuilder {
    pub fn normalizer(mut self, normalizer: Arc<dyn PageNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn DocumentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ModelListLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set or clear the model backend.
    pub fn maybe_backend(mut self, backend: Option<Arc<dyn ModelBackend>>) -> Self {
        self.backend = backend;
        self
    }

    pub fn dump_policy(mut self, policy: DumpPolicy) -> Self {
        self.dump_policy = policy;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress = Some(cb);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            normalizer: self
                .normalizer
                .unwrap_or_else(|| Arc::new(PdfiumPageWindow::default())),
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(TextLayerClassifier::default())),
            loader: self.loader.unwrap_or_else(|| Arc::new(JsonModelLoader)),
            backend: self.backend,
            dump_policy: self.dump_policy,
            progress: self.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_pair() {
        let (handle, token) = CancelToken::pair();
        let other = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn never_token_stays_clear() {
        assert!(!CancelToken::never().is_cancelled());
    }

    #[test]
    fn document_name_validation() {
        assert!(validate_document_name("paper").is_ok());
        assert!(validate_document_name("my paper v2").is_ok());
        assert!(validate_document_name("").is_err());
        assert!(validate_document_name("a/b").is_err());
        assert!(validate_document_name("..").is_err());
    }

    #[test]
    fn builder_without_backend() {
        let orchestrator = Orchestrator::builder().build();
        assert!(!orchestrator.has_backend());
    }
}
