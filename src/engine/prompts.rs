//! Prompts for vision-model page recognition.
//!
//! The OCR backend turns each rendered page into markdown, then splits that
//! markdown into layout blocks (see [`crate::engine::vlm`]). The prompt asks
//! for exactly the markdown shapes the splitter recognises: `#` headings,
//! GFM pipe tables, `$$` display equations.

use crate::engine::InferenceOptions;

/// Base instructions, always sent.
pub const PAGE_OCR_PROMPT: &str = r#"You transcribe one scanned document page into Markdown.

Rules:
- Transcribe ALL visible text in natural reading order. Do not summarise.
- Use # / ## / ### for headings, matching their visual hierarchy.
- Keep paragraphs separated by one blank line.
- Skip page numbers, running headers and running footers.
- Do not describe pictures and do not emit image links.
- Output only the Markdown. No code fences, no commentary."#;

const TABLE_RULE: &str =
    "- Render tables as GFM pipe tables with a `| --- |` separator row after the header.";
const NO_TABLE_RULE: &str = "- Render tables as plain text lines, one row per line.";
const FORMULA_RULE: &str =
    "- Render display formulas as LaTeX on their own lines between `$$` delimiters; inline math as `$...$`.";
const NO_FORMULA_RULE: &str = "- Write formulas as plain text.";

/// Full system prompt for the given feature toggles and language hint.
pub fn page_ocr_prompt(options: &InferenceOptions) -> String {
    let mut prompt = String::from(PAGE_OCR_PROMPT);
    for rule in [
        if options.table_enable { TABLE_RULE } else { NO_TABLE_RULE },
        if options.formula_enable { FORMULA_RULE } else { NO_FORMULA_RULE },
    ] {
        prompt.push('\n');
        prompt.push_str(rule);
    }
    if let Some(lang) = options.lang.as_deref().filter(|l| !l.trim().is_empty()) {
        prompt.push_str(&format!(
            "\n- The page is written in '{}'. Keep the original language; do not translate.",
            lang.trim()
        ));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_select_rules() {
        let on = page_ocr_prompt(&InferenceOptions {
            formula_enable: true,
            table_enable: true,
            ..Default::default()
        });
        assert!(on.contains("GFM pipe tables"));
        assert!(on.contains("$$"));

        let off = page_ocr_prompt(&InferenceOptions::default());
        assert!(off.contains("plain text lines"));
        assert!(off.contains("formulas as plain text"));
    }

    #[test]
    fn language_hint_is_included() {
        let p = page_ocr_prompt(&InferenceOptions {
            lang: Some("ch".into()),
            ..Default::default()
        });
        assert!(p.contains("'ch'"));
        assert!(!page_ocr_prompt(&InferenceOptions::default()).contains("written in"));
    }
}
