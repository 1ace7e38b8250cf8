//! [`ModelInference`]: per-page model output plus the source PDF, and the
//! loader that builds one from a caller-supplied model list.

use crate::config::ParseMode;
use crate::engine::model::{BlockKind, PageModel};
use crate::engine::piped::PipedDocument;
use crate::engine::{encode, pdfium};
use crate::engine::{InferenceResult, ModelListLoader, PipeResult};
use crate::error::{EngineError, InferenceError};
use crate::storage::StorageWriter;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Inference output for one normalised document.
#[derive(Debug, Clone)]
pub struct ModelInference {
    pdf: Bytes,
    pages: Vec<PageModel>,
    max_rendered_pixels: u32,
}

impl ModelInference {
    pub fn new(pdf: Bytes, pages: Vec<PageModel>) -> Self {
        Self {
            pdf,
            pages,
            max_rendered_pixels: pdfium::DEFAULT_MAX_RENDERED_PIXELS,
        }
    }

    pub fn pages(&self) -> &[PageModel] {
        &self.pages
    }

    /// Fill empty title/text blocks from the PDF text layer.
    async fn fill_from_text_layer(&self, pages: &mut [PageModel]) -> Result<(), InferenceError> {
        let mut slots = Vec::new();
        let mut regions = Vec::new();
        for (p, page) in pages.iter().enumerate() {
            for (b, block) in page.blocks.iter().enumerate() {
                if matches!(block.kind, BlockKind::Title | BlockKind::Text) && block.text.trim().is_empty() {
                    slots.push((p, b));
                    regions.push((page.page_idx, block.bbox));
                }
            }
        }
        if regions.is_empty() {
            return Ok(());
        }

        debug!("Filling {} blocks from the text layer", regions.len());
        let texts = pdfium::texts_in_regions(self.pdf.clone(), regions).await?;
        for ((p, b), text) in slots.into_iter().zip(texts) {
            pages[p].blocks[b].text = text;
        }
        Ok(())
    }

    /// Crop image and table blocks out of page renders and write them as
    /// `p{page}_b{block}.png`. Returns `(page position, block index) → key`.
    async fn extract_images(
        &self,
        pages: &[PageModel],
        images: &dyn StorageWriter,
    ) -> Result<HashMap<(usize, usize), String>, EngineError> {
        let wanted: Vec<usize> = pages
            .iter()
            .filter(|p| p.blocks.iter().any(|b| is_pictured(b.kind)))
            .map(|p| p.page_idx)
            .collect();
        let mut keys = HashMap::new();
        if wanted.is_empty() {
            return Ok(keys);
        }

        let rendered = pdfium::render_pages(self.pdf.clone(), wanted, self.max_rendered_pixels).await?;
        for render in &rendered {
            let Some(pos) = pages.iter().position(|p| p.page_idx == render.page_idx) else {
                continue;
            };
            for (b, block) in pages[pos].blocks.iter().enumerate() {
                if !is_pictured(block.kind) {
                    continue;
                }
                let Some(crop) = encode::crop_region(&render.image, block.bbox, render.scale) else {
                    continue;
                };
                let png = encode::png_bytes(&crop).map_err(|e| {
                    InferenceError::with_source(format!("page {}: image encoding", render.page_idx + 1), e)
                })?;
                let key = image_key(render.page_idx, b);
                images.write(&key, &png).await?;
                keys.insert((pos, b), key);
            }
        }
        info!("Wrote {} images", keys.len());
        Ok(keys)
    }

    async fn pipe(
        &self,
        mode: ParseMode,
        images: &dyn StorageWriter,
        debug: bool,
        lang: Option<&str>,
    ) -> Result<Box<dyn PipeResult>, EngineError> {
        let mut pages = self.pages.clone();
        if mode == ParseMode::Text {
            self.fill_from_text_layer(&mut pages).await?;
        }
        let image_keys = self.extract_images(&pages, images).await?;

        if debug {
            for page in &pages {
                debug!(
                    "page {}: {} blocks ({} discarded)",
                    page.page_idx,
                    page.blocks.len(),
                    page.blocks.iter().filter(|b| b.kind == BlockKind::Discarded).count()
                );
            }
        }

        Ok(Box::new(PipedDocument::new(mode, lang.map(str::to_string), pages, image_keys)))
    }
}

fn is_pictured(kind: BlockKind) -> bool {
    matches!(kind, BlockKind::Image | BlockKind::Table)
}

/// Image key for block `block` of page `page_idx`.
pub fn image_key(page_idx: usize, block: usize) -> String {
    format!("p{page_idx:04}_b{block:03}.png")
}

#[async_trait]
impl InferenceResult for ModelInference {
    async fn pipe_text_mode(
        &self,
        images: &dyn StorageWriter,
        debug: bool,
        lang: Option<&str>,
    ) -> Result<Box<dyn PipeResult>, EngineError> {
        self.pipe(ParseMode::Text, images, debug, lang).await
    }

    async fn pipe_ocr_mode(
        &self,
        images: &dyn StorageWriter,
        debug: bool,
        lang: Option<&str>,
    ) -> Result<Box<dyn PipeResult>, EngineError> {
        self.pipe(ParseMode::Ocr, images, debug, lang).await
    }

    async fn dump_model(&self, writer: &dyn StorageWriter, key: &str) -> Result<(), EngineError> {
        let json = serde_json::to_vec_pretty(&self.pages)
            .map_err(|e| InferenceError::with_source("model json serialisation", e))?;
        writer.write(key, &json).await?;
        Ok(())
    }
}

/// Deserialises a model list, one [`PageModel`] per element.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelLoader;

#[async_trait]
impl ModelListLoader for JsonModelLoader {
    async fn load(
        &self,
        model_list: &[serde_json::Value],
        pdf: &Bytes,
    ) -> Result<Box<dyn InferenceResult>, InferenceError> {
        let pages = model_list
            .iter()
            .enumerate()
            .map(|(i, value)| {
                serde_json::from_value::<PageModel>(value.clone())
                    .map_err(|e| InferenceError::with_source(format!("model list entry {i}"), e))
            })
            .collect::<Result<Vec<PageModel>, _>>()?;

        let mut seen = HashSet::with_capacity(pages.len());
        if let Some(dup) = pages.iter().find(|p| !seen.insert(p.page_idx)) {
            return Err(InferenceError::new(format!(
                "model list has more than one entry for page_idx {}",
                dup.page_idx
            )));
        }
        Ok(Box::new(ModelInference::new(pdf.clone(), pages)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::model::LayoutBlock;
    use crate::error::StorageError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Vec<u8>)>>);

    #[async_trait]
    impl StorageWriter for Recorder {
        async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
            self.0.lock().unwrap().push((key.to_string(), data.to_vec()));
            Ok(())
        }
    }

    fn page(blocks: Vec<LayoutBlock>) -> PageModel {
        PageModel {
            page_idx: 0,
            width: 100.0,
            height: 100.0,
            blocks,
        }
    }

    #[tokio::test]
    async fn loader_rejects_malformed_entries() {
        let err = JsonModelLoader
            .load(&[json!({"page_idx": "zero"})], &Bytes::new())
            .await
            .err()
            .unwrap();
        assert!(err.message().contains("entry 0"));
    }

    #[tokio::test]
    async fn loader_rejects_repeated_pages() {
        let entry = |idx: usize| json!({"page_idx": idx, "width": 10.0, "height": 10.0, "blocks": []});
        let err = JsonModelLoader
            .load(&[entry(0), entry(1), entry(0)], &Bytes::new())
            .await
            .err()
            .unwrap();
        assert!(err.message().contains("page_idx 0"));

        assert!(JsonModelLoader
            .load(&[entry(0), entry(1)], &Bytes::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn model_dump_is_pretty_json() {
        let inference = ModelInference::new(
            Bytes::new(),
            vec![page(vec![LayoutBlock::new(BlockKind::Text, [0.0, 0.0, 1.0, 1.0], "hi")])],
        );
        let writer = Recorder::default();
        inference.dump_model(&writer, "doc_model.json").await.unwrap();
        let written = writer.0.lock().unwrap();
        assert_eq!(written[0].0, "doc_model.json");
        let back: Vec<PageModel> = serde_json::from_slice(&written[0].1).unwrap();
        assert_eq!(back, inference.pages());
    }

    #[tokio::test]
    async fn ocr_pipe_without_pictures_needs_no_renderer() {
        let inference = ModelInference::new(
            Bytes::from_static(b"not a pdf"),
            vec![page(vec![LayoutBlock::new(BlockKind::Text, [0.0, 0.0, 1.0, 1.0], "body")])],
        );
        let images = Recorder::default();
        let piped = inference.pipe_ocr_mode(&images, true, Some("en")).await.unwrap();
        assert!(images.0.lock().unwrap().is_empty());

        let out = Recorder::default();
        piped.dump_middle_json(&out, "m.json").await.unwrap();
        let middle: serde_json::Value = serde_json::from_slice(&out.0.lock().unwrap()[0].1).unwrap();
        assert_eq!(middle["_parse_type"], "ocr");
        assert_eq!(middle["_lang"], "en");
    }

    #[tokio::test]
    async fn text_pipe_with_filled_blocks_skips_text_layer() {
        let inference = ModelInference::new(
            Bytes::from_static(b"not a pdf"),
            vec![page(vec![LayoutBlock::title([0.0, 0.0, 1.0, 1.0], "Heading", 1)])],
        );
        let piped = inference.pipe_text_mode(&Recorder::default(), false, None).await;
        assert!(piped.is_ok());
    }

    #[test]
    fn image_keys_are_positional() {
        assert_eq!(image_key(3, 12), "p0003_b012.png");
    }
}
