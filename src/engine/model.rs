//! Serialisable page and block types.
//!
//! One [`PageModel`] per page is what the model backend produces, what a
//! supplied model list deserialises into, and what `<name>_model.json`
//! contains. Coordinates are PDF points with a top-left origin.

use serde::{Deserialize, Serialize};

/// Layout category of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Title,
    Text,
    Table,
    Equation,
    Image,
    /// Headers, footers, page numbers: kept in the model, left out of output.
    Discarded,
}

/// One detected region of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutBlock {
    pub kind: BlockKind,
    /// `[x0, y0, x1, y1]`
    pub bbox: [f32; 4],
    /// Recognised content. For text-mode runs an empty text block is filled
    /// from the PDF text layer during piping.
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_score")]
    pub score: f32,
    /// Heading level, titles only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u8>,
}

fn default_score() -> f32 {
    1.0
}

impl LayoutBlock {
    pub fn new(kind: BlockKind, bbox: [f32; 4], text: impl Into<String>) -> Self {
        Self {
            kind,
            bbox,
            text: text.into(),
            score: 1.0,
            level: None,
        }
    }

    pub fn title(bbox: [f32; 4], text: impl Into<String>, level: u8) -> Self {
        Self {
            level: Some(level.clamp(1, 6)),
            ..Self::new(BlockKind::Title, bbox, text)
        }
    }
}

/// Inference output for a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageModel {
    /// 0-based index within the normalised document.
    pub page_idx: usize,
    pub width: f32,
    pub height: f32,
    #[serde(default, alias = "layout_dets")]
    pub blocks: Vec<LayoutBlock>,
}

impl PageModel {
    /// A bbox covering the whole page.
    pub fn full_bbox(&self) -> [f32; 4] {
        [0.0, 0.0, self.width, self.height]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_deserialises_with_defaults() {
        let page: PageModel = serde_json::from_value(json!({
            "page_idx": 0,
            "width": 612.0,
            "height": 792.0,
            "layout_dets": [
                {"kind": "title", "bbox": [10, 10, 300, 40], "text": "Intro", "level": 2},
                {"kind": "text", "bbox": [10, 50, 600, 200]}
            ]
        }))
        .unwrap();
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].level, Some(2));
        assert_eq!(page.blocks[1].text, "");
        assert_eq!(page.blocks[1].score, 1.0);
    }

    #[test]
    fn title_level_is_clamped() {
        assert_eq!(LayoutBlock::title([0.0; 4], "x", 9).level, Some(6));
        assert_eq!(LayoutBlock::title([0.0; 4], "x", 0).level, Some(1));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let r: Result<LayoutBlock, _> =
            serde_json::from_value(json!({"kind": "sidebar", "bbox": [0, 0, 1, 1]}));
        assert!(r.is_err());
    }
}
