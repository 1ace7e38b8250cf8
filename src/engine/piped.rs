//! [`PipedDocument`]: the post-processed document and its three renderings.
//!
//! * middle JSON: `{pdf_info: [...], _parse_type, _lang, _version_name}`,
//!   one `pdf_info` entry per page with `para_blocks` and `discarded_blocks`
//! * markdown: blocks in reading order, pages separated by a blank line
//! * content list: a flat JSON array of typed items tagged with `page_idx`
//!
//! Image references are `<image_prefix>/<image key>`.

use crate::config::{MarkdownMode, ParseMode};
use crate::engine::model::{BlockKind, LayoutBlock, PageModel};
use crate::engine::postprocess;
use crate::engine::PipeResult;
use crate::error::{EngineError, InferenceError};
use crate::paths;
use crate::storage::StorageWriter;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// One block after piping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipedBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub bbox: [f32; 4],
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
    /// Key under the image prefix, for image and table blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipedPage {
    pub page_idx: usize,
    pub page_size: [f32; 2],
    pub para_blocks: Vec<PipedBlock>,
    pub discarded_blocks: Vec<PipedBlock>,
}

#[derive(Debug, Serialize)]
struct MiddleJson<'a> {
    pdf_info: &'a [PipedPage],
    #[serde(rename = "_parse_type")]
    parse_type: &'static str,
    #[serde(rename = "_lang")]
    lang: Option<&'a str>,
    #[serde(rename = "_version_name")]
    version_name: &'static str,
}

/// One entry of `<name>_content_list.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text_level: Option<u8>,
        page_idx: usize,
    },
    Equation {
        text: String,
        text_format: &'static str,
        page_idx: usize,
    },
    Table {
        table_body: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        img_path: Option<String>,
        page_idx: usize,
    },
    Image {
        img_path: String,
        page_idx: usize,
    },
}

/// Post-processed document ready to be dumped.
#[derive(Debug, Clone)]
pub struct PipedDocument {
    mode: ParseMode,
    lang: Option<String>,
    pages: Vec<PipedPage>,
}

impl PipedDocument {
    /// `image_keys` maps `(page position, block index)` to the key each
    /// extracted image was written under.
    pub fn new(
        mode: ParseMode,
        lang: Option<String>,
        pages: Vec<PageModel>,
        image_keys: HashMap<(usize, usize), String>,
    ) -> Self {
        let pages = pages
            .into_iter()
            .enumerate()
            .map(|(pos, page)| {
                let mut para_blocks = Vec::new();
                let mut discarded_blocks = Vec::new();
                for (b, block) in page.blocks.into_iter().enumerate() {
                    let discarded = block.kind == BlockKind::Discarded;
                    let piped = piped_block(block, image_keys.get(&(pos, b)).cloned());
                    if discarded {
                        discarded_blocks.push(piped);
                    } else if !is_empty(&piped) {
                        para_blocks.push(piped);
                    }
                }
                PipedPage {
                    page_idx: page.page_idx,
                    page_size: [page.width, page.height],
                    para_blocks,
                    discarded_blocks,
                }
            })
            .collect();
        Self { mode, lang, pages }
    }

    pub fn pages(&self) -> &[PipedPage] {
        &self.pages
    }

    fn middle(&self) -> MiddleJson<'_> {
        MiddleJson {
            pdf_info: &self.pages,
            parse_type: self.mode.as_str(),
            lang: self.lang.as_deref(),
            version_name: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn middle_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self.middle())
    }

    pub fn markdown(&self, image_prefix: &str, mode: MarkdownMode) -> String {
        let mut parts: Vec<String> = Vec::new();
        for page in &self.pages {
            for block in &page.para_blocks {
                if let Some(md) = block_markdown(block, image_prefix, mode) {
                    parts.push(md);
                }
            }
        }
        postprocess::clean_markdown(&parts.join("\n\n"))
    }

    pub fn content_list(&self, image_prefix: &str) -> Vec<ContentItem> {
        let img_path = |key: &Option<String>| key.as_deref().map(|k| paths::join(image_prefix, k));
        let mut items = Vec::new();
        for page in &self.pages {
            let page_idx = page.page_idx;
            for block in &page.para_blocks {
                let item = match block.kind {
                    BlockKind::Title => ContentItem::Text {
                        text: block.text.clone(),
                        text_level: Some(block.level.unwrap_or(1)),
                        page_idx,
                    },
                    BlockKind::Text => ContentItem::Text {
                        text: block.text.clone(),
                        text_level: None,
                        page_idx,
                    },
                    BlockKind::Equation => ContentItem::Equation {
                        text: block.text.clone(),
                        text_format: "latex",
                        page_idx,
                    },
                    BlockKind::Table => ContentItem::Table {
                        table_body: block.text.clone(),
                        img_path: img_path(&block.image_key),
                        page_idx,
                    },
                    BlockKind::Image => match img_path(&block.image_key) {
                        Some(img_path) => ContentItem::Image { img_path, page_idx },
                        None => continue,
                    },
                    BlockKind::Discarded => continue,
                };
                items.push(item);
            }
        }
        items
    }
}

fn piped_block(block: LayoutBlock, image_key: Option<String>) -> PipedBlock {
    PipedBlock {
        kind: block.kind,
        bbox: block.bbox,
        text: block.text.trim().to_string(),
        level: block.level,
        image_key,
    }
}

fn is_empty(block: &PipedBlock) -> bool {
    block.text.is_empty() && block.image_key.is_none()
}

fn block_markdown(block: &PipedBlock, image_prefix: &str, mode: MarkdownMode) -> Option<String> {
    let image_link = || {
        block
            .image_key
            .as_deref()
            .filter(|_| mode == MarkdownMode::Multimodal)
            .map(|k| format!("![]({})", paths::join(image_prefix, k)))
    };
    match block.kind {
        BlockKind::Title => {
            let level = block.level.unwrap_or(1).clamp(1, 6) as usize;
            Some(format!("{} {}", "#".repeat(level), block.text))
        }
        BlockKind::Text => Some(block.text.clone()),
        BlockKind::Equation => Some(format!("$$\n{}\n$$", block.text)),
        BlockKind::Table if !block.text.is_empty() => Some(block.text.clone()),
        BlockKind::Table | BlockKind::Image => image_link(),
        BlockKind::Discarded => None,
    }
}

fn to_json(value: &impl Serialize, what: &str) -> Result<Vec<u8>, EngineError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| InferenceError::with_source(format!("{what} serialisation"), e).into())
}

#[async_trait]
impl PipeResult for PipedDocument {
    async fn dump_md(
        &self,
        writer: &dyn StorageWriter,
        key: &str,
        image_prefix: &str,
        mode: MarkdownMode,
    ) -> Result<(), EngineError> {
        writer.write(key, self.markdown(image_prefix, mode).as_bytes()).await?;
        Ok(())
    }

    async fn dump_middle_json(&self, writer: &dyn StorageWriter, key: &str) -> Result<(), EngineError> {
        writer.write(key, &to_json(&self.middle(), "middle json")?).await?;
        Ok(())
    }

    async fn dump_content_list(
        &self,
        writer: &dyn StorageWriter,
        key: &str,
        image_prefix: &str,
    ) -> Result<(), EngineError> {
        let items = self.content_list(image_prefix);
        writer.write(key, &to_json(&items, "content list")?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> PipedDocument {
        let page = PageModel {
            page_idx: 0,
            width: 612.0,
            height: 792.0,
            blocks: vec![
                LayoutBlock::title([0.0, 0.0, 10.0, 10.0], "Results", 2),
                LayoutBlock::new(BlockKind::Text, [0.0, 10.0, 10.0, 20.0], "Body text."),
                LayoutBlock::new(BlockKind::Image, [0.0, 20.0, 10.0, 30.0], ""),
                LayoutBlock::new(BlockKind::Equation, [0.0, 30.0, 10.0, 40.0], "a+b"),
                LayoutBlock::new(BlockKind::Discarded, [0.0, 780.0, 10.0, 790.0], "7"),
                LayoutBlock::new(BlockKind::Text, [0.0, 50.0, 10.0, 60.0], "   "),
            ],
        };
        let mut keys = HashMap::new();
        keys.insert((0, 2), "p0000_b002.png".to_string());
        PipedDocument::new(ParseMode::Text, Some("en".into()), vec![page], keys)
    }

    #[test]
    fn empty_and_discarded_blocks_are_separated() {
        let d = doc();
        assert_eq!(d.pages()[0].para_blocks.len(), 4);
        assert_eq!(d.pages()[0].discarded_blocks.len(), 1);
    }

    #[test]
    fn multimodal_markdown_links_images() {
        let md = doc().markdown("out/doc/auto/images", MarkdownMode::Multimodal);
        assert_eq!(
            md,
            "## Results\n\nBody text.\n\n![](out/doc/auto/images/p0000_b002.png)\n\n$$\na+b\n$$\n"
        );
    }

    #[test]
    fn text_only_markdown_omits_images() {
        let md = doc().markdown("out/doc/auto/images", MarkdownMode::TextOnly);
        assert!(!md.contains("!["));
        assert!(md.contains("Body text."));
    }

    #[test]
    fn content_list_items() {
        let items = doc().content_list("imgs");
        assert_eq!(items.len(), 4);
        assert_eq!(
            items[0],
            ContentItem::Text {
                text: "Results".into(),
                text_level: Some(2),
                page_idx: 0
            }
        );
        assert_eq!(
            items[2],
            ContentItem::Image {
                img_path: "imgs/p0000_b002.png".into(),
                page_idx: 0
            }
        );
        let json = serde_json::to_value(&items).unwrap();
        assert_eq!(json[3]["type"], "equation");
        assert_eq!(json[3]["text_format"], "latex");
        assert!(json[1].get("text_level").is_none());
    }

    #[test]
    fn middle_json_shape() {
        let v = doc().middle_json().unwrap();
        assert_eq!(v["_parse_type"], "txt");
        assert_eq!(v["_lang"], "en");
        assert_eq!(v["pdf_info"][0]["page_size"][0], 612.0);
        assert_eq!(v["pdf_info"][0]["para_blocks"][0]["type"], "title");
        assert_eq!(v["pdf_info"][0]["para_blocks"][2]["image_key"], "p0000_b002.png");
    }
}
