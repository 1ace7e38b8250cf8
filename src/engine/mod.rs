//! Collaborators the orchestrator drives, and their default implementations.
//!
//! The orchestrator knows nothing about PDFs, layout models or rendering. It
//! talks to six traits:
//!
//! ```text
//! PageNormalizer      restrict the document to the requested page window
//! DocumentClassifier  decide TEXT vs OCR for method = auto
//! ModelBackend        run inference (the "inside model")
//! ModelListLoader     wrap a caller-supplied model list instead
//! InferenceResult     pipe_text_mode | pipe_ocr_mode, dump_model
//! PipeResult          dump_md, dump_middle_json, dump_content_list
//! ```
//!
//! The submodules provide the implementations the CLI uses:
//!
//! * [`pdfium`]: page-window copy, text-layer classification, rendering
//! * [`vlm`]: model backend, pdfium text layer or a vision LLM for OCR
//! * [`inference`]: [`inference::ModelInference`] and the model-list loader
//! * [`piped`]: [`piped::PipedDocument`] with markdown, middle JSON, content list
//! * [`model`]: serialisable page/block types shared by the above

pub mod encode;
pub mod inference;
pub mod model;
pub mod pdfium;
pub mod piped;
pub mod postprocess;
pub mod prompts;
pub mod vlm;

use crate::config::{MarkdownMode, ParseMode, ParseRequest};
use crate::error::{EngineError, InferenceError};
use crate::storage::StorageWriter;
use async_trait::async_trait;
use bytes::Bytes;

/// Feature toggles forwarded to the model backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InferenceOptions {
    pub lang: Option<String>,
    pub layout_model: Option<String>,
    pub formula_enable: bool,
    pub table_enable: bool,
}

impl From<&ParseRequest> for InferenceOptions {
    fn from(req: &ParseRequest) -> Self {
        Self {
            lang: req.lang.clone(),
            layout_model: req.layout_model.clone(),
            formula_enable: req.formula_enable,
            table_enable: req.table_enable,
        }
    }
}

/// Restricts a document to a page window.
#[async_trait]
pub trait PageNormalizer: Send + Sync {
    /// Return the document reduced to pages `[start, end]` (inclusive,
    /// 0-indexed, `end = None` → last page).
    async fn select_pages(
        &self,
        pdf: Bytes,
        start: usize,
        end: Option<usize>,
    ) -> Result<Bytes, InferenceError>;
}

/// Decides whether a document should go through text extraction or OCR.
#[async_trait]
pub trait DocumentClassifier: Send + Sync {
    async fn classify(&self, pdf: &Bytes) -> Result<ParseMode, InferenceError>;
}

/// Runs layout/OCR/formula inference over a document.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn analyze(
        &self,
        pdf: &Bytes,
        mode: ParseMode,
        options: &InferenceOptions,
    ) -> Result<Box<dyn InferenceResult>, InferenceError>;
}

/// Turns a caller-supplied model list into an [`InferenceResult`].
#[async_trait]
pub trait ModelListLoader: Send + Sync {
    async fn load(
        &self,
        model_list: &[serde_json::Value],
        pdf: &Bytes,
    ) -> Result<Box<dyn InferenceResult>, InferenceError>;
}

/// Raw inference output with its two mode-specific transforms.
#[async_trait]
pub trait InferenceResult: Send + Sync {
    /// Post-process for a document with a usable text layer. Embedded images
    /// are written through `images`.
    async fn pipe_text_mode(
        &self,
        images: &dyn StorageWriter,
        debug: bool,
        lang: Option<&str>,
    ) -> Result<Box<dyn PipeResult>, EngineError>;

    /// Post-process for a scanned document.
    async fn pipe_ocr_mode(
        &self,
        images: &dyn StorageWriter,
        debug: bool,
        lang: Option<&str>,
    ) -> Result<Box<dyn PipeResult>, EngineError>;

    /// Write the raw model output as JSON.
    async fn dump_model(&self, writer: &dyn StorageWriter, key: &str) -> Result<(), EngineError>;
}

/// The post-processed document, ready to be rendered into artifacts.
#[async_trait]
pub trait PipeResult: Send + Sync {
    async fn dump_md(
        &self,
        writer: &dyn StorageWriter,
        key: &str,
        image_prefix: &str,
        mode: MarkdownMode,
    ) -> Result<(), EngineError>;

    async fn dump_middle_json(&self, writer: &dyn StorageWriter, key: &str) -> Result<(), EngineError>;

    async fn dump_content_list(
        &self,
        writer: &dyn StorageWriter,
        key: &str,
        image_prefix: &str,
    ) -> Result<(), EngineError>;
}
