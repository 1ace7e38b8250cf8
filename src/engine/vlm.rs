//! The bundled model backend.
//!
//! * [`ParseMode::Text`]: the pdfium text layer, grouped into paragraph and
//!   title blocks. No model call.
//! * [`ParseMode::Ocr`]: every page is rendered, sent to a vision LLM
//!   through `edgequake-llm`, and the returned markdown is split into
//!   title / text / table / equation blocks.
//!
//! LLM calls are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`), bounded by `request_timeout_secs`
//! each, and run `concurrency` pages at a time.

use crate::config::ParseMode;
use crate::engine::inference::ModelInference;
use crate::engine::model::{BlockKind, LayoutBlock, PageModel};
use crate::engine::{encode, pdfium, postprocess, prompts};
use crate::engine::{InferenceOptions, InferenceResult, ModelBackend};
use crate::error::{ConfigurationError, InferenceError};
use async_trait::async_trait;
use bytes::Bytes;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Default model when a provider is named without one.
pub const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

/// Tuning for [`VlmBackend`].
#[derive(Debug, Clone)]
pub struct VlmSettings {
    /// Provider name (`openai`, `anthropic`, `ollama`, …). `None` → detect.
    pub provider_name: Option<String>,
    /// Model name. `None` → provider default.
    pub model: Option<String>,
    /// Longest edge of a rendered page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,
    /// Pages in flight at once. Default: 10.
    pub concurrency: usize,
    /// Default: 0.1.
    pub temperature: f32,
    /// Default: 4096.
    pub max_tokens: usize,
    /// Retries per page after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Base backoff. Default: 500 ms.
    pub retry_backoff_ms: u64,
    /// Per-call timeout. Default: 60 s.
    pub request_timeout_secs: u64,
}

impl Default for VlmSettings {
    fn default() -> Self {
        Self {
            provider_name: None,
            model: None,
            max_rendered_pixels: pdfium::DEFAULT_MAX_RENDERED_PIXELS,
            concurrency: 10,
            temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            request_timeout_secs: 60,
        }
    }
}

/// pdfium text layer for text documents, vision LLM for scanned ones.
#[derive(Clone)]
pub struct VlmBackend {
    provider: Arc<dyn LLMProvider>,
    provider_name: String,
    settings: VlmSettings,
}

impl fmt::Debug for VlmBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmBackend")
            .field("provider_name", &self.provider_name)
            .field("settings", &self.settings)
            .finish()
    }
}

impl VlmBackend {
    /// Use a pre-built provider.
    pub fn with_provider(
        provider: Arc<dyn LLMProvider>,
        provider_name: impl Into<String>,
        settings: VlmSettings,
    ) -> Self {
        Self {
            provider,
            provider_name: provider_name.into(),
            settings,
        }
    }

    /// Resolve a provider, from most to least specific:
    ///
    /// 1. `settings.provider_name` (+ `settings.model`)
    /// 2. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`, both set
    /// 3. `OPENAI_API_KEY`
    /// 4. `ProviderFactory::from_env` auto-detection
    ///
    /// Returns `Ok(None)` when nothing is configured. A provider that was
    /// named explicitly but cannot be built is an error.
    pub fn from_env(settings: VlmSettings) -> Result<Option<Self>, ConfigurationError> {
        if let Some(name) = settings.provider_name.clone() {
            let model = settings.model.clone().unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string());
            let provider = create_vision_provider(&name, &model)?;
            return Ok(Some(Self::with_provider(provider, name, settings)));
        }

        if let (Ok(name), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !name.is_empty() && !model.is_empty() {
                let provider = create_vision_provider(&name, &model)?;
                let settings = VlmSettings {
                    model: Some(model),
                    ..settings
                };
                return Ok(Some(Self::with_provider(provider, name, settings)));
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            let model = settings.model.clone().unwrap_or_else(|| DEFAULT_VISION_MODEL.to_string());
            let provider = create_vision_provider("openai", &model)?;
            return Ok(Some(Self::with_provider(provider, "openai", settings)));
        }

        match ProviderFactory::from_env() {
            Ok((provider, _embedding)) => Ok(Some(Self::with_provider(provider, "auto", settings))),
            Err(e) => {
                debug!("No LLM provider detected: {}", e);
                Ok(None)
            }
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn settings(&self) -> &VlmSettings {
        &self.settings
    }

    /// The provider for this run: the configured one, or one built for a
    /// `layout_model` that differs from the configured model.
    fn provider_for(&self, options: &InferenceOptions) -> Result<Arc<dyn LLMProvider>, InferenceError> {
        match options.layout_model.as_deref() {
            Some(model) if Some(model) != self.settings.model.as_deref() && self.provider_name != "auto" => {
                info!("Using layout model '{}' via {}", model, self.provider_name);
                create_vision_provider(&self.provider_name, model)
                    .map_err(|e| InferenceError::with_source(format!("layout model '{model}'"), e))
            }
            Some(model) if Some(model) != self.settings.model.as_deref() => {
                warn!("Ignoring layout model '{}': provider was auto-detected", model);
                Ok(Arc::clone(&self.provider))
            }
            _ => Ok(Arc::clone(&self.provider)),
        }
    }

    async fn analyze_ocr(
        &self,
        pdf: &Bytes,
        options: &InferenceOptions,
    ) -> Result<Vec<PageModel>, InferenceError> {
        let provider = self.provider_for(options)?;
        let rendered = pdfium::render_pages(pdf.clone(), Vec::new(), self.settings.max_rendered_pixels).await?;
        let system_prompt = prompts::page_ocr_prompt(options);
        info!("OCR: {} pages via {}", rendered.len(), self.provider_name);

        let mut pages: Vec<PageModel> = stream::iter(rendered.into_iter().map(|page| {
            let provider = Arc::clone(&provider);
            let system_prompt = system_prompt.as_str();
            async move {
                let image = encode::encode_page(&page.image).map_err(|e| {
                    InferenceError::with_source(format!("page {}: image encoding", page.page_idx + 1), e)
                })?;
                let markdown =
                    recognise_page(&provider, page.page_idx + 1, system_prompt, image, &self.settings).await?;
                let width = page.image.width() as f32 / page.scale;
                let height = page.image.height() as f32 / page.scale;
                Ok::<_, InferenceError>(PageModel {
                    page_idx: page.page_idx,
                    width,
                    height,
                    blocks: markdown_to_blocks(&markdown, width, height, options),
                })
            }
        }))
        .buffer_unordered(self.settings.concurrency.max(1))
        .try_collect()
        .await?;

        pages.sort_by_key(|p| p.page_idx);
        Ok(pages)
    }
}

#[async_trait]
impl ModelBackend for VlmBackend {
    async fn analyze(
        &self,
        pdf: &Bytes,
        mode: ParseMode,
        options: &InferenceOptions,
    ) -> Result<Box<dyn InferenceResult>, InferenceError> {
        let started = Instant::now();
        let pages = match mode {
            ParseMode::Text => pdfium::text_layer_pages(pdf.clone()).await?,
            ParseMode::Ocr => self.analyze_ocr(pdf, options).await?,
        };
        info!(
            "Inference ({}) produced {} pages in {}ms",
            mode,
            pages.len(),
            started.elapsed().as_millis()
        );
        Ok(Box::new(ModelInference::new(pdf.clone(), pages)))
    }
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ConfigurationError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ConfigurationError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// One page through the vision model, with retries.
async fn recognise_page(
    provider: &Arc<dyn LLMProvider>,
    page_num: usize,
    system_prompt: &str,
    image: ImageData,
    settings: &VlmSettings,
) -> Result<String, InferenceError> {
    let messages = vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_with_images("", vec![image]),
    ];
    let options = CompletionOptions {
        temperature: Some(settings.temperature),
        max_tokens: Some(settings.max_tokens),
        ..Default::default()
    };
    let limit = Duration::from_secs(settings.request_timeout_secs.max(1));

    let mut last_err = String::from("no attempt made");
    for attempt in 0..=settings.max_retries {
        if attempt > 0 {
            let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Page {}: retry {}/{} after {}ms",
                page_num, attempt, settings.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        match timeout(limit, provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => {
                debug!(
                    "Page {}: {} input tokens, {} output tokens",
                    page_num, response.prompt_tokens, response.completion_tokens
                );
                return Ok(postprocess::clean_markdown(&response.content));
            }
            Ok(Err(e)) => last_err = e.to_string(),
            Err(_) => last_err = format!("timed out after {}s", limit.as_secs()),
        }
        warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, last_err);
    }

    Err(InferenceError::new(format!(
        "page {page_num}: vision model failed after {} attempts: {last_err}",
        settings.max_retries + 1
    )))
}

// ── Markdown → blocks ────────────────────────────────────────────────────

/// Split recognised page markdown into layout blocks.
///
/// The model gives no coordinates, so blocks get equal-height horizontal
/// bands in reading order. Image links are dropped: a scanned page has no
/// embedded images to link to.
pub fn markdown_to_blocks(
    markdown: &str,
    width: f32,
    height: f32,
    options: &InferenceOptions,
) -> Vec<LayoutBlock> {
    let mut chunks: Vec<(BlockKind, Option<u8>, String)> = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut equation: Option<Vec<&str>> = None;

    fn flush(paragraph: &mut Vec<&str>, chunks: &mut Vec<(BlockKind, Option<u8>, String)>) {
        if paragraph.is_empty() {
            return;
        }
        let is_table = paragraph.iter().all(|l| l.trim_start().starts_with('|'));
        let (kind, text) = if is_table {
            (BlockKind::Table, paragraph.join("\n"))
        } else {
            (BlockKind::Text, paragraph.iter().map(|l| l.trim()).collect::<Vec<_>>().join(" "))
        };
        chunks.push((kind, None, text));
        paragraph.clear();
    }

    for line in markdown.lines() {
        let trimmed = line.trim();

        if let Some(body) = equation.as_mut() {
            if let Some(rest) = trimmed.strip_suffix("$$") {
                if !rest.trim().is_empty() {
                    body.push(rest.trim());
                }
                chunks.push((BlockKind::Equation, None, body.join("\n")));
                equation = None;
            } else {
                body.push(trimmed);
            }
            continue;
        }

        if trimmed.is_empty() {
            flush(&mut paragraph, &mut chunks);
        } else if let Some(inner) = trimmed
            .strip_prefix("$$")
            .and_then(|r| r.strip_suffix("$$"))
            .filter(|_| trimmed.len() >= 4)
        {
            flush(&mut paragraph, &mut chunks);
            chunks.push((BlockKind::Equation, None, inner.trim().to_string()));
        } else if let Some(rest) = trimmed.strip_prefix("$$") {
            flush(&mut paragraph, &mut chunks);
            equation = Some(if rest.trim().is_empty() { Vec::new() } else { vec![rest.trim()] });
        } else if let Some((level, title)) = heading(trimmed) {
            flush(&mut paragraph, &mut chunks);
            chunks.push((BlockKind::Title, Some(level), title.to_string()));
        } else if trimmed.starts_with("![") {
            flush(&mut paragraph, &mut chunks);
        } else {
            paragraph.push(line);
        }
    }
    if let Some(body) = equation {
        chunks.push((BlockKind::Equation, None, body.join("\n")));
    }
    flush(&mut paragraph, &mut chunks);

    let band = height / chunks.len().max(1) as f32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, (kind, level, text))| {
            let kind = match kind {
                BlockKind::Equation if !options.formula_enable => BlockKind::Text,
                BlockKind::Table if !options.table_enable => BlockKind::Text,
                other => other,
            };
            let bbox = [0.0, band * i as f32, width, band * (i + 1) as f32];
            LayoutBlock {
                level,
                ..LayoutBlock::new(kind, bbox, text)
            }
        })
        .collect()
}

fn heading(line: &str) -> Option<(u8, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let title = line[hashes..].strip_prefix(' ')?.trim();
    (!title.is_empty()).then_some((hashes as u8, title))
}
