//! Post-processing: deterministic cleanup of rendered Markdown.
//!
//! ## Why is post-processing necessary?
//!
//! The renderer works one element at a time and cannot see the document as a
//! whole. Publisher XHTML is full of artefacts that only become visible once
//! the fragment is flattened to text:
//!
//! - Empty `<p>`/`<div>` runs used as vertical spacing turn into long stretches
//!   of blank lines
//! - `<img>` tags without `alt` text become bare `![](…)` markers
//! - `<pre>` blocks that only held whitespace become empty fenced code blocks
//! - Non-breaking and zero-width characters survive as invisible noise
//!
//! Each rule is a pure `&str → String` pass, independently testable.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule can assume `\n`.
//! Empty fences are removed before blank-line collapsing because removing a
//! fence leaves blank lines behind.

use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder alt text for images that declare none.
pub const IMAGE_ALT_PLACEHOLDER: &str = "image";

/// Apply all post-processing rules to one rendered fragment.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Remove empty fenced code blocks
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines to one blank line
/// 6. Give bare `![](x)` images a placeholder alt text
/// 7. Ensure the text ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = remove_empty_fences(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = label_bare_images(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Remove empty fenced code blocks ─────────────────────────────────
//
// Scans line by line so that the closing fence of one block and the opening
// fence of the next are never mistaken for an empty pair.

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn remove_empty_fences(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let mut result: Vec<&str> = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if in_fence {
            if line.trim() == "```" {
                in_fence = false;
            }
            result.push(line);
            i += 1;
            continue;
        }

        if is_fence(line) {
            let mut j = i + 1;
            while j < lines.len() && lines[j].trim().is_empty() {
                j += 1;
            }
            if j < lines.len() && lines[j].trim() == "```" {
                i = j + 1;
                continue;
            }
            in_fence = true;
        }
        result.push(line);
        i += 1;
    }

    result.join("\n")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 6: Label bare images ────────────────────────────────────────────────

static RE_BARE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[\s*\]\(([^)]*)\)").unwrap());

fn label_bare_images(input: &str) -> String {
    RE_BARE_IMAGE
        .replace_all(input, |caps: &regex::Captures<'_>| {
            format!("![{}]({})", IMAGE_ALT_PLACEHOLDER, &caps[1])
        })
        .to_string()
}

// ── Rule 7: Ensure text ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_remove_empty_fence() {
        let input = "before\n\n```\n   \n```\n\nafter";
        assert_eq!(remove_empty_fences(input), "before\n\n\nafter");
    }

    #[test]
    fn test_adjacent_code_blocks_survive() {
        let input = "```\none\n```\n\n```\ntwo\n```";
        assert_eq!(remove_empty_fences(input), input);
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(
            trim_trailing_whitespace("  hello   \nworld  "),
            "  hello\nworld"
        );
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb\n\nc\nd"), "a\n\nb\n\nc\nd");
    }

    #[test]
    fn test_label_bare_images() {
        assert_eq!(
            label_bare_images("x ![](/books/1/images/a.png) y ![Fig](b.png)"),
            "x ![image](/books/1/images/a.png) y ![Fig](b.png)"
        );
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline("  \n"), "");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "# Title\r\n\r\n\r\n\r\nSome text   \n```\n```\n\n\n\n![](a.png)";
        let result = clean_markdown(input);
        assert_eq!(result, "# Title\n\nSome text\n\n![image](a.png)\n");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let once = clean_markdown("a\n\n\n\nb ![](c)\n```\n\n```\n");
        assert_eq!(clean_markdown(&once), once);
    }
}
