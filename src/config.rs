//! Request and endpoint configuration.
//!
//! A parse run is described by one immutable [`ParseRequest`], built through
//! [`ParseRequestBuilder`]. Only what the caller cares about needs setting;
//! every other field has the default documented on it.
//!
//! The method is kept as the raw string the caller supplied. It is parsed
//! when the run starts so that an unrecognised method surfaces as
//! [`crate::error::ConfigurationError::UnknownMethod`] from the orchestrator,
//! the same way every other fatal condition does.

use crate::error::{ConfigurationError, ParseError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Method / mode ────────────────────────────────────────────────────────

/// Parsing strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMethod {
    /// The classifier decides between text extraction and OCR.
    #[default]
    Auto,
    /// Text-layer extraction.
    Txt,
    /// Image-based recognition.
    Ocr,
}

impl ParseMethod {
    /// Directory name used in the artifact layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMethod::Auto => "auto",
            ParseMethod::Txt => "txt",
            ParseMethod::Ocr => "ocr",
        }
    }
}

impl FromStr for ParseMethod {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ParseMethod::Auto),
            "txt" | "text" => Ok(ParseMethod::Txt),
            "ocr" => Ok(ParseMethod::Ocr),
            _ => Err(ConfigurationError::UnknownMethod {
                method: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ParseMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The mode actually used for a run, decided once during classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseMode {
    /// The document has a usable text layer.
    #[serde(rename = "txt")]
    Text,
    /// The document is scanned or its text layer is unusable.
    Ocr,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Text => "txt",
            ParseMode::Ocr => "ocr",
        }
    }
}

impl fmt::Display for ParseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Page window ──────────────────────────────────────────────────────────

/// 0-indexed, inclusive page window. `end = None` means "to the last page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageWindow {
    pub start: usize,
    pub end: Option<usize>,
}

impl PageWindow {
    pub fn new(start: usize, end: Option<usize>) -> Self {
        Self { start, end }
    }

    /// Every page of the document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }

    /// Reject windows that end before they start.
    pub fn validate(&self) -> Result<(), ParseError> {
        match self.end {
            Some(end) if end < self.start => Err(ParseError::InvalidPageWindow {
                start: self.start,
                end,
            }),
            _ => Ok(()),
        }
    }

    /// Clamp the window to a document with `total` pages.
    ///
    /// Returns `None` when the window starts past the last page.
    pub fn clamp(&self, total: usize) -> Option<(usize, usize)> {
        if self.start >= total {
            return None;
        }
        let last = total - 1;
        let end = self.end.map_or(last, |e| e.min(last));
        Some((self.start, end))
    }
}

// ── Artifacts ────────────────────────────────────────────────────────────

/// One derived output of a parse run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Markdown,
    MiddleJson,
    ModelJson,
    OriginPdf,
    ContentList,
}

impl Artifact {
    /// Dump order. Only affects log readability: every artifact has its own key.
    pub const ORDER: [Artifact; 5] = [
        Artifact::Markdown,
        Artifact::MiddleJson,
        Artifact::ModelJson,
        Artifact::OriginPdf,
        Artifact::ContentList,
    ];

    /// Key of this artifact relative to the artifact prefix.
    pub fn file_name(&self, document_name: &str) -> String {
        match self {
            Artifact::Markdown => format!("{document_name}.md"),
            Artifact::MiddleJson => format!("{document_name}_middle.json"),
            Artifact::ModelJson => format!("{document_name}_model.json"),
            Artifact::OriginPdf => format!("{document_name}_origin.pdf"),
            Artifact::ContentList => format!("{document_name}_content_list.json"),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Artifact::Markdown => "markdown",
            Artifact::MiddleJson => "middle json",
            Artifact::ModelJson => "model json",
            Artifact::OriginPdf => "origin pdf",
            Artifact::ContentList => "content list",
        })
    }
}

/// Independent per-artifact dump switches. All enabled by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFlags {
    pub markdown: bool,
    pub middle_json: bool,
    pub model_json: bool,
    pub origin_pdf: bool,
    pub content_list: bool,
}

impl Default for DumpFlags {
    fn default() -> Self {
        Self::all()
    }
}

impl DumpFlags {
    pub fn all() -> Self {
        Self {
            markdown: true,
            middle_json: true,
            model_json: true,
            origin_pdf: true,
            content_list: true,
        }
    }

    pub fn none() -> Self {
        Self {
            markdown: false,
            middle_json: false,
            model_json: false,
            origin_pdf: false,
            content_list: false,
        }
    }

    pub fn is_enabled(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::Markdown => self.markdown,
            Artifact::MiddleJson => self.middle_json,
            Artifact::ModelJson => self.model_json,
            Artifact::OriginPdf => self.origin_pdf,
            Artifact::ContentList => self.content_list,
        }
    }

    pub fn set(&mut self, artifact: Artifact, enabled: bool) {
        match artifact {
            Artifact::Markdown => self.markdown = enabled,
            Artifact::MiddleJson => self.middle_json = enabled,
            Artifact::ModelJson => self.model_json = enabled,
            Artifact::OriginPdf => self.origin_pdf = enabled,
            Artifact::ContentList => self.content_list = enabled,
        }
    }

    /// Enabled artifacts in dump order.
    pub fn enabled(&self) -> Vec<Artifact> {
        Artifact::ORDER
            .into_iter()
            .filter(|a| self.is_enabled(*a))
            .collect()
    }
}

/// How markdown output treats embedded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarkdownMode {
    /// Text plus `![](…)` links to the images written under the image prefix.
    #[default]
    Multimodal,
    /// Text only; images are left out.
    TextOnly,
}

/// What to do when an artifact dump fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DumpPolicy {
    /// Attempt every enabled dump, then report all failures together.
    #[default]
    BestEffort,
    /// Stop at the first failed dump.
    FailFast,
}

// ── Request ──────────────────────────────────────────────────────────────

/// Everything a single parse run needs, apart from where to write.
#[derive(Clone)]
pub struct ParseRequest {
    /// Document name used for the artifact prefix and file names.
    pub document_name: String,

    /// Raw PDF bytes.
    pub pdf: Bytes,

    /// Requested method as supplied by the caller. Default: `"auto"`.
    pub method: String,

    /// Pages to keep before inference. Default: all.
    pub pages: PageWindow,

    /// Language hint forwarded to the model backend and pipe transforms.
    pub lang: Option<String>,

    /// Layout model selection forwarded to the model backend.
    pub layout_model: Option<String>,

    /// Recognise formulae. Default: true.
    pub formula_enable: bool,

    /// Recognise tables. Default: true.
    pub table_enable: bool,

    /// Which artifacts to write. Default: all.
    pub dump: DumpFlags,

    /// Markdown image handling. Default: [`MarkdownMode::Multimodal`].
    pub markdown_mode: MarkdownMode,

    /// Pre-computed model output, one JSON value per page. When non-empty
    /// the model backend is not consulted.
    pub model_list: Vec<serde_json::Value>,

    /// Logical root under which `<document_name>/<method>/` is created.
    /// Default: `"output"`.
    pub output_root: String,

    /// Verbose pipe transforms. Default: false.
    pub debug: bool,
}

impl fmt::Debug for ParseRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseRequest")
            .field("document_name", &self.document_name)
            .field("pdf_len", &self.pdf.len())
            .field("method", &self.method)
            .field("pages", &self.pages)
            .field("lang", &self.lang)
            .field("layout_model", &self.layout_model)
            .field("formula_enable", &self.formula_enable)
            .field("table_enable", &self.table_enable)
            .field("dump", &self.dump)
            .field("markdown_mode", &self.markdown_mode)
            .field("model_list_len", &self.model_list.len())
            .field("output_root", &self.output_root)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ParseRequest {
    /// Start a request for `document_name` with the given PDF bytes.
    pub fn builder(document_name: impl Into<String>, pdf: impl Into<Bytes>) -> ParseRequestBuilder {
        ParseRequestBuilder {
            request: ParseRequest {
                document_name: document_name.into(),
                pdf: pdf.into(),
                method: ParseMethod::Auto.as_str().to_string(),
                pages: PageWindow::all(),
                lang: None,
                layout_model: None,
                formula_enable: true,
                table_enable: true,
                dump: DumpFlags::all(),
                markdown_mode: MarkdownMode::default(),
                model_list: Vec::new(),
                output_root: "output".to_string(),
                debug: false,
            },
        }
    }
}

/// Builder for [`ParseRequest`].
#[derive(Debug)]
pub struct ParseRequestBuilder {
    request: ParseRequest,
}

impl ParseRequestBuilder {
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.request.method = method.into();
        self
    }

    pub fn pages(mut self, pages: PageWindow) -> Self {
        self.request.pages = pages;
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.request.lang = Some(lang.into());
        self
    }

    pub fn layout_model(mut self, model: impl Into<String>) -> Self {
        self.request.layout_model = Some(model.into());
        self
    }

    pub fn formula_enable(mut self, v: bool) -> Self {
        self.request.formula_enable = v;
        self
    }

    pub fn table_enable(mut self, v: bool) -> Self {
        self.request.table_enable = v;
        self
    }

    pub fn dump(mut self, flags: DumpFlags) -> Self {
        self.request.dump = flags;
        self
    }

    pub fn markdown_mode(mut self, mode: MarkdownMode) -> Self {
        self.request.markdown_mode = mode;
        self
    }

    pub fn model_list(mut self, pages: Vec<serde_json::Value>) -> Self {
        self.request.model_list = pages;
        self
    }

    pub fn output_root(mut self, root: impl Into<String>) -> Self {
        self.request.output_root = root.into();
        self
    }

    pub fn debug(mut self, v: bool) -> Self {
        self.request.debug = v;
        self
    }

    pub fn build(self) -> ParseRequest {
        self.request
    }
}

// ── Storage endpoint ─────────────────────────────────────────────────────

/// URL style used to address buckets on an S3-compatible endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingStyle {
    /// Let the client pick; path style for custom endpoints.
    #[default]
    Auto,
    /// `http://endpoint/bucket/key`
    Path,
    /// `http://bucket.endpoint/key`
    Virtual,
}

impl FromStr for AddressingStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(AddressingStyle::Auto),
            "path" => Ok(AddressingStyle::Path),
            "virtual" => Ok(AddressingStyle::Virtual),
            other => Err(format!(
                "unknown addressing style '{other}' (expected auto, path or virtual)"
            )),
        }
    }
}

/// One S3-compatible backend instance: bucket, credential pair, endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct StorageEndpoint {
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// `host:port` or a full URL. Without a scheme, plain HTTP is used.
    pub endpoint_url: String,
    pub addressing_style: AddressingStyle,
}

impl StorageEndpoint {
    pub fn new(
        bucket: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            endpoint_url: endpoint_url.into(),
            addressing_style: AddressingStyle::Auto,
        }
    }

    pub fn with_addressing_style(mut self, style: AddressingStyle) -> Self {
        self.addressing_style = style;
        self
    }

    /// Endpoint URL with a scheme.
    pub fn endpoint(&self) -> String {
        let url = self.endpoint_url.trim_end_matches('/');
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{url}")
        }
    }
}

impl fmt::Debug for StorageEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEndpoint")
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .field("addressing_style", &self.addressing_style)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parsing_accepts_aliases() {
        assert_eq!("auto".parse::<ParseMethod>().unwrap(), ParseMethod::Auto);
        assert_eq!("TXT".parse::<ParseMethod>().unwrap(), ParseMethod::Txt);
        assert_eq!("text".parse::<ParseMethod>().unwrap(), ParseMethod::Txt);
        assert_eq!(" ocr ".parse::<ParseMethod>().unwrap(), ParseMethod::Ocr);
        assert!(matches!(
            "bogus".parse::<ParseMethod>(),
            Err(ConfigurationError::UnknownMethod { method }) if method == "bogus"
        ));
    }

    #[test]
    fn dump_flags_follow_fixed_order() {
        let mut flags = DumpFlags::none();
        flags.set(Artifact::ContentList, true);
        flags.set(Artifact::Markdown, true);
        assert_eq!(flags.enabled(), vec![Artifact::Markdown, Artifact::ContentList]);
        assert_eq!(DumpFlags::all().enabled(), Artifact::ORDER.to_vec());
        assert!(DumpFlags::none().enabled().is_empty());
    }

    #[test]
    fn artifact_file_names() {
        assert_eq!(Artifact::Markdown.file_name("paper"), "paper.md");
        assert_eq!(Artifact::MiddleJson.file_name("paper"), "paper_middle.json");
        assert_eq!(Artifact::ModelJson.file_name("paper"), "paper_model.json");
        assert_eq!(Artifact::OriginPdf.file_name("paper"), "paper_origin.pdf");
        assert_eq!(
            Artifact::ContentList.file_name("paper"),
            "paper_content_list.json"
        );
    }

    #[test]
    fn page_window_validation_and_clamping() {
        assert!(PageWindow::new(3, Some(1)).validate().is_err());
        assert!(PageWindow::new(1, Some(1)).validate().is_ok());
        assert_eq!(PageWindow::all().clamp(4), Some((0, 3)));
        assert_eq!(PageWindow::new(1, Some(10)).clamp(4), Some((1, 3)));
        assert_eq!(PageWindow::new(4, None).clamp(4), None);
        assert!(PageWindow::all().is_all());
    }

    #[test]
    fn endpoint_debug_redacts_secret() {
        let ep = StorageEndpoint::new("bucket", "AKID", "super-secret", "minio:9000");
        let dbg = format!("{ep:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("AKID"));
    }

    #[test]
    fn endpoint_defaults_to_plain_http() {
        let ep = StorageEndpoint::new("b", "a", "s", "minio:9000");
        assert_eq!(ep.endpoint(), "http://minio:9000");
        let ep = StorageEndpoint::new("b", "a", "s", "https://s3.example.com/");
        assert_eq!(ep.endpoint(), "https://s3.example.com");
    }

    #[test]
    fn request_builder_defaults() {
        let req = ParseRequest::builder("doc", b"%PDF-1.7".to_vec()).build();
        assert_eq!(req.method, "auto");
        assert_eq!(req.output_root, "output");
        assert_eq!(req.dump, DumpFlags::all());
        assert!(req.formula_enable && req.table_enable);
        assert!(req.model_list.is_empty());
    }
}
