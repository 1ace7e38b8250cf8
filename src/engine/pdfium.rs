//! pdfium-backed collaborators: page-window copy, text-layer classification,
//! text-layer extraction and page rendering.
//!
//! `pdfium-render` wraps a C++ library that is not safe to drive from async
//! worker threads, so every public async function here moves its work onto
//! `tokio::task::spawn_blocking` and loads the document from bytes there.
//!
//! Library lookup order: `PDFIUM_LIB_PATH` (file or directory), the working
//! directory, then the system library.

use crate::config::{PageWindow, ParseMode};
use crate::engine::model::{BlockKind, LayoutBlock, PageModel};
use crate::engine::{DocumentClassifier, PageNormalizer};
use crate::error::InferenceError;
use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

/// Longest edge of a rendered page, in pixels.
pub const DEFAULT_MAX_RENDERED_PIXELS: u32 = 2000;

// ── Binding ──────────────────────────────────────────────────────────────

fn load_pdfium() -> Result<Pdfium, InferenceError> {
    if let Some(value) = std::env::var_os("PDFIUM_LIB_PATH") {
        let path = Path::new(&value);
        let bound = if path.is_dir() {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        } else {
            Pdfium::bind_to_library(path)
        };
        if let Ok(bindings) = bound {
            return Ok(Pdfium::new(bindings));
        }
    }

    match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./")) {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(primary) => match Pdfium::bind_to_system_library() {
            Ok(bindings) => Ok(Pdfium::new(bindings)),
            Err(_) => Err(InferenceError::new(format!(
                "pdfium library not found (set PDFIUM_LIB_PATH): {primary:?}"
            ))),
        },
    }
}

fn pdfium_error(context: &str, e: PdfiumError) -> InferenceError {
    InferenceError::new(format!("{context}: {e:?}"))
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T, InferenceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, InferenceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| InferenceError::with_source(format!("{what} task panicked"), e))?
}

// ── Page window ──────────────────────────────────────────────────────────

/// Copies the requested page window into a new document.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumPageWindow;

#[async_trait]
impl PageNormalizer for PdfiumPageWindow {
    async fn select_pages(
        &self,
        pdf: Bytes,
        start: usize,
        end: Option<usize>,
    ) -> Result<Bytes, InferenceError> {
        let window = PageWindow::new(start, end);
        if window.is_all() {
            return Ok(pdf);
        }
        blocking("page window", move || copy_window(&pdf, window)).await
    }
}

fn copy_window(pdf: &Bytes, window: PageWindow) -> Result<Bytes, InferenceError> {
    let pdfium = load_pdfium()?;
    let source = pdfium
        .load_pdf_from_byte_slice(pdf, None)
        .map_err(|e| pdfium_error("cannot open PDF", e))?;
    let total = source.pages().len() as usize;

    let (first, last) = window.clamp(total).ok_or_else(|| {
        InferenceError::new(format!(
            "start page {} is past the last page (document has {total} pages)",
            window.start
        ))
    })?;
    if first == 0 && last + 1 == total {
        return Ok(pdf.clone());
    }

    let mut target = pdfium
        .create_new_pdf()
        .map_err(|e| pdfium_error("cannot create PDF", e))?;
    target
        .pages_mut()
        .copy_page_range_from_document(&source, first as u16..=last as u16, 0)
        .map_err(|e| pdfium_error("cannot copy pages", e))?;
    let bytes = target
        .save_to_bytes()
        .map_err(|e| pdfium_error("cannot save PDF", e))?;

    info!("Kept pages {}..={} of {}", first, last, total);
    Ok(Bytes::from(bytes))
}

// ── Classification ───────────────────────────────────────────────────────

/// Classifies by text-layer density.
///
/// A page counts as "text" when its text layer has at least
/// `min_chars_per_page` non-whitespace characters; the document is
/// [`ParseMode::Text`] when the share of text pages reaches
/// `min_text_page_ratio`. An empty document is [`ParseMode::Ocr`].
#[derive(Debug, Clone, Copy)]
pub struct TextLayerClassifier {
    pub min_chars_per_page: usize,
    pub min_text_page_ratio: f32,
}

impl Default for TextLayerClassifier {
    fn default() -> Self {
        Self {
            min_chars_per_page: 100,
            min_text_page_ratio: 0.5,
        }
    }
}

impl TextLayerClassifier {
    /// Decide from per-page character counts.
    pub fn decide(&self, chars_per_page: &[usize]) -> ParseMode {
        if chars_per_page.is_empty() {
            return ParseMode::Ocr;
        }
        let text_pages = chars_per_page
            .iter()
            .filter(|n| **n >= self.min_chars_per_page)
            .count();
        let ratio = text_pages as f32 / chars_per_page.len() as f32;
        debug!(
            "text layer: {}/{} pages with >= {} chars",
            text_pages,
            chars_per_page.len(),
            self.min_chars_per_page
        );
        if ratio >= self.min_text_page_ratio {
            ParseMode::Text
        } else {
            ParseMode::Ocr
        }
    }
}

#[async_trait]
impl DocumentClassifier for TextLayerClassifier {
    async fn classify(&self, pdf: &Bytes) -> Result<ParseMode, InferenceError> {
        let pdf = pdf.clone();
        let counts = blocking("classify", move || {
            let pdfium = load_pdfium()?;
            let document = pdfium
                .load_pdf_from_byte_slice(&pdf, None)
                .map_err(|e| pdfium_error("cannot open PDF", e))?;
            let mut counts = Vec::new();
            for (idx, page) in document.pages().iter().enumerate() {
                let text = page
                    .text()
                    .map_err(|e| pdfium_error(&format!("page {idx}: text layer"), e))?;
                counts.push(text.all().chars().filter(|c| !c.is_whitespace()).count());
            }
            Ok(counts)
        })
        .await?;
        Ok(self.decide(&counts))
    }
}

// ── Text layer ───────────────────────────────────────────────────────────

/// One text segment, top-left origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub text: String,
}

impl TextLine {
    fn height(&self) -> f32 {
        (self.bottom - self.top).abs()
    }
}

/// Read every page's text layer into a [`PageModel`] of paragraph blocks.
pub async fn text_layer_pages(pdf: Bytes) -> Result<Vec<PageModel>, InferenceError> {
    blocking("text layer", move || {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&pdf, None)
            .map_err(|e| pdfium_error("cannot open PDF", e))?;

        let mut pages = Vec::new();
        for (page_idx, page) in document.pages().iter().enumerate() {
            let width = page.width().value;
            let height = page.height().value;
            let text = page
                .text()
                .map_err(|e| pdfium_error(&format!("page {page_idx}: text layer"), e))?;

            let lines: Vec<TextLine> = text
                .segments()
                .iter()
                .filter_map(|segment| {
                    let content = segment.text();
                    if content.trim().is_empty() {
                        return None;
                    }
                    let bounds = segment.bounds();
                    Some(TextLine {
                        left: bounds.left().value,
                        top: height - bounds.top().value,
                        right: bounds.right().value,
                        bottom: height - bounds.bottom().value,
                        text: content.trim().to_string(),
                    })
                })
                .collect();

            pages.push(PageModel {
                page_idx,
                width,
                height,
                blocks: group_lines(lines),
            });
        }
        Ok(pages)
    })
    .await
}

/// Group lines into paragraph blocks by vertical gap, and promote
/// single-line paragraphs set in a larger font to titles.
pub fn group_lines(mut lines: Vec<TextLine>) -> Vec<LayoutBlock> {
    if lines.is_empty() {
        return Vec::new();
    }
    lines.sort_by(|a, b| a.top.total_cmp(&b.top).then(a.left.total_cmp(&b.left)));

    let median_height = median(lines.iter().map(TextLine::height).collect()).unwrap_or(10.0);
    let paragraph_gap = (median_height * 0.9).max(1.0);

    let mut paragraphs: Vec<Vec<TextLine>> = Vec::new();
    for line in lines {
        let starts_new = match paragraphs.last().and_then(|p| p.last()) {
            Some(prev) => line.top - prev.bottom > paragraph_gap,
            None => true,
        };
        if starts_new {
            paragraphs.push(vec![line]);
        } else if let Some(current) = paragraphs.last_mut() {
            current.push(line);
        }
    }

    paragraphs
        .into_iter()
        .map(|para| {
            let bbox = [
                para.iter().map(|l| l.left).fold(f32::MAX, f32::min),
                para.iter().map(|l| l.top).fold(f32::MAX, f32::min),
                para.iter().map(|l| l.right).fold(f32::MIN, f32::max),
                para.iter().map(|l| l.bottom).fold(f32::MIN, f32::max),
            ];
            let text = join_lines(&para);
            let line_height = para[0].height();
            if para.len() == 1 && text.chars().count() <= 120 && line_height >= median_height * 1.25 {
                let level = if line_height >= median_height * 1.8 { 1 } else { 2 };
                LayoutBlock::title(bbox, text, level)
            } else {
                LayoutBlock::new(BlockKind::Text, bbox, text)
            }
        })
        .collect()
}

/// Join wrapped lines, undoing end-of-line hyphenation.
fn join_lines(lines: &[TextLine]) -> String {
    let mut out = String::new();
    for line in lines {
        if out.ends_with('-') {
            out.pop();
        } else if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&line.text);
    }
    out
}

fn median(mut values: Vec<f32>) -> Option<f32> {
    values.retain(|v| v.is_finite() && *v > 0.0);
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    Some(values[values.len() / 2])
}

/// pdfium page index; `None` past what a `u16` can address.
fn page_index(page_idx: usize) -> Option<u16> {
    u16::try_from(page_idx).ok()
}

/// Text-layer content inside each `(page_idx, bbox)` region, in order.
/// Regions on missing pages yield an empty string.
pub async fn texts_in_regions(
    pdf: Bytes,
    regions: Vec<(usize, [f32; 4])>,
) -> Result<Vec<String>, InferenceError> {
    if regions.is_empty() {
        return Ok(Vec::new());
    }
    blocking("region text", move || {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&pdf, None)
            .map_err(|e| pdfium_error("cannot open PDF", e))?;
        let pages = document.pages();

        let mut out = Vec::with_capacity(regions.len());
        for (page_idx, bbox) in regions {
            let Some(page) = page_index(page_idx).and_then(|i| pages.get(i).ok()) else {
                out.push(String::new());
                continue;
            };
            let height = page.height().value;
            let text = page
                .text()
                .map_err(|e| pdfium_error(&format!("page {page_idx}: text layer"), e))?;
            let rect = PdfRect::new_from_values(height - bbox[3], bbox[0], height - bbox[1], bbox[2]);
            out.push(text.inside_rect(rect).trim().to_string());
        }
        Ok(out)
    })
    .await
}

// ── Rendering ────────────────────────────────────────────────────────────

/// A rasterised page and its pixels-per-point scale.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_idx: usize,
    pub image: DynamicImage,
    pub scale: f32,
}

/// Render `pages` (all pages when empty), longest edge capped at
/// `max_pixels`. Out-of-range indices are skipped.
pub async fn render_pages(
    pdf: Bytes,
    pages: Vec<usize>,
    max_pixels: u32,
) -> Result<Vec<RenderedPage>, InferenceError> {
    blocking("render", move || {
        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&pdf, None)
            .map_err(|e| pdfium_error("cannot open PDF", e))?;
        let all = document.pages();
        let total = all.len() as usize;
        let wanted: Vec<usize> = if pages.is_empty() {
            (0..total).collect()
        } else {
            pages.into_iter().filter(|idx| *idx < total).collect()
        };

        let config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut out = Vec::with_capacity(wanted.len());
        for page_idx in wanted {
            let index = page_index(page_idx)
                .ok_or_else(|| InferenceError::new(format!("page {page_idx} is out of range")))?;
            let page = all
                .get(index)
                .map_err(|e| pdfium_error(&format!("page {page_idx}"), e))?;
            let image = page
                .render_with_config(&config)
                .map_err(|e| pdfium_error(&format!("page {page_idx}: render"), e))?
                .as_image();
            let scale = image.width() as f32 / page.width().value.max(1.0);
            debug!("Rendered page {} → {}x{} px", page_idx + 1, image.width(), image.height());
            out.push(RenderedPage {
                page_idx,
                image,
                scale,
            });
        }
        Ok(out)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_index_never_wraps() {
        assert_eq!(page_index(3), Some(3));
        assert_eq!(page_index(65_535), Some(65_535));
        assert_eq!(page_index(65_536), None);
        assert_eq!(page_index(65_539), None);
    }

    fn line(top: f32, height: f32, text: &str) -> TextLine {
        TextLine {
            left: 50.0,
            top,
            right: 500.0,
            bottom: top + height,
            text: text.to_string(),
        }
    }

    #[test]
    fn classifier_thresholds() {
        let c = TextLayerClassifier::default();
        assert_eq!(c.decide(&[]), ParseMode::Ocr);
        assert_eq!(c.decide(&[500, 0]), ParseMode::Text);
        assert_eq!(c.decide(&[500, 0, 0]), ParseMode::Ocr);
        assert_eq!(c.decide(&[99]), ParseMode::Ocr);
        assert_eq!(c.decide(&[100]), ParseMode::Text);
    }

    #[test]
    fn lines_group_into_paragraphs() {
        let blocks = group_lines(vec![
            line(100.0, 10.0, "first para line one"),
            line(112.0, 10.0, "continues here"),
            line(150.0, 10.0, "second para"),
        ]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].text, "first para line one continues here");
        assert_eq!(blocks[0].bbox, [50.0, 100.0, 500.0, 122.0]);
        assert_eq!(blocks[1].kind, BlockKind::Text);
    }

    #[test]
    fn large_single_line_becomes_title() {
        let blocks = group_lines(vec![
            line(40.0, 24.0, "Introduction"),
            line(100.0, 10.0, "body a"),
            line(112.0, 10.0, "body b"),
            line(124.0, 10.0, "body c"),
        ]);
        assert_eq!(blocks[0].kind, BlockKind::Title);
        assert_eq!(blocks[0].level, Some(1));
        assert_eq!(blocks[1].kind, BlockKind::Text);
    }

    #[test]
    fn hyphenated_lines_are_rejoined() {
        let blocks = group_lines(vec![line(0.0, 10.0, "docu-"), line(11.0, 10.0, "ment")]);
        assert_eq!(blocks[0].text, "document");
    }

    #[tokio::test]
    async fn full_window_is_passthrough() {
        let bytes = Bytes::from_static(b"%PDF-1.7 not parsed");
        let out = PdfiumPageWindow.select_pages(bytes.clone(), 0, None).await.unwrap();
        assert_eq!(out, bytes);
    }
}
