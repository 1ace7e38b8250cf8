//! Markdown normalisation applied to VLM page output and to the assembled
//! `<name>.md`.
//!
//! Passes, in order:
//!
//! 1. unwrap a single outer code fence
//! 2. CRLF / CR → LF, drop zero-width characters, BOM and soft hyphens
//! 3. trailing whitespace off every line
//! 4. a blank line before every heading
//! 5. missing GFM separator row after a table header
//! 6. at most two consecutive blank lines
//! 7. exactly one trailing newline
//!
//! Every pass is a pure `&str → String` function. The passes never touch
//! image links: markdown built by [`crate::engine::piped`] links to images
//! written by the same run.

use once_cell::sync::Lazy;
use regex::Regex;

/// Normalise a markdown document.
pub fn clean_markdown(input: &str) -> String {
    let s = unwrap_outer_fence(input);
    let s = normalise_chars(&s);
    let s = trim_line_ends(&s);
    let s = space_headings(&s);
    let s = add_table_separators(&s);
    let s = squeeze_blank_lines(&s);
    single_final_newline(&s)
}

static OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```$").expect("static regex")
});

fn unwrap_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match OUTER_FENCE.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

const INVISIBLE: [char; 6] = ['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

fn normalise_chars(input: &str) -> String {
    input
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace(INVISIBLE, "")
}

fn trim_line_ends(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

fn is_heading(line: &str) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && line[hashes..].starts_with(' ')
}

fn space_headings(input: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for line in input.lines() {
        if is_heading(line) && out.last().is_some_and(|prev| !prev.is_empty()) {
            out.push("");
        }
        out.push(line);
    }
    out.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let t = line.trim();
    t.len() > 2 && t.starts_with('|') && t.ends_with('|')
}

fn is_separator_row(line: &str) -> bool {
    let t = line.trim();
    is_table_row(t) && t.contains('-') && t.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn add_table_separators(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        out.push(line.to_string());
        let starts_table = is_table_row(line)
            && !is_separator_row(line)
            && (i == 0 || !is_table_row(lines[i - 1]));
        if !starts_table {
            continue;
        }
        if let Some(next) = lines.get(i + 1) {
            if is_table_row(next) && !is_separator_row(next) {
                let cols = line.trim().matches('|').count().saturating_sub(1).max(1);
                out.push(format!("|{}", " --- |".repeat(cols)));
            }
        }
    }
    out.join("\n")
}

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").expect("static regex"));

fn squeeze_blank_lines(input: &str) -> String {
    BLANK_RUN.replace_all(input, "\n\n\n").into_owned()
}

fn single_final_newline(input: &str) -> String {
    let body = input.trim_end();
    if body.is_empty() {
        "\n".to_string()
    } else {
        format!("{body}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_fence() {
        assert_eq!(unwrap_outer_fence("```markdown\n# A\nb\n```"), "# A\nb");
        assert_eq!(unwrap_outer_fence("```\nx\n```\n"), "x");
        assert_eq!(unwrap_outer_fence("# A\n```\ncode\n```"), "# A\n```\ncode\n```");
    }

    #[test]
    fn strips_invisible_and_crlf() {
        assert_eq!(normalise_chars("a\r\nb\u{200B}c\u{FEFF}\rd"), "a\nbc\nd");
    }

    #[test]
    fn headings_get_blank_line() {
        assert_eq!(space_headings("text\n## Two\nmore"), "text\n\n## Two\nmore");
        assert_eq!(space_headings("# One\nbody"), "# One\nbody");
        assert_eq!(space_headings("#hashtag\nx"), "#hashtag\nx");
    }

    #[test]
    fn table_gets_separator_once() {
        let fixed = add_table_separators("| A | B |\n| 1 | 2 |\n| 3 | 4 |");
        let lines: Vec<&str> = fixed.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(is_separator_row(lines[1]));
        assert!(!is_separator_row(lines[2]));

        let ok = "| A | B |\n| --- | --- |\n| 1 | 2 |";
        assert_eq!(add_table_separators(ok), ok);
    }

    #[test]
    fn blank_runs_are_squeezed() {
        assert_eq!(squeeze_blank_lines("a\n\n\n\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn full_pass() {
        let cleaned = clean_markdown("```md\n# Title\r\n\r\ntext   \n\n\n\n\n\n## Next\n| a | b |\n| 1 | 2 |\n```");
        assert!(cleaned.starts_with("# Title\n"));
        assert!(cleaned.contains("text\n\n\n## Next"));
        assert!(cleaned.contains("| --- | --- |"));
        assert!(cleaned.ends_with("|\n"));
        assert_eq!(clean_markdown("   "), "\n");
    }
}
