//! Markdown-to-plain-text cleanup applied to extracted document text before chunking.

use std::sync::OnceLock;

use regex::Regex;

struct Patterns {
    image: Regex,
    link: Regex,
    heading: Regex,
    blank_runs: Regex,
}

impl Patterns {
    fn get() -> &'static Patterns {
        static PATTERNS: OnceLock<Patterns> = OnceLock::new();
        PATTERNS.get_or_init(|| Patterns {
            image: Regex::new(r"!\[[^\]]*\]\([^)]*\)").expect("image pattern"),
            link: Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("link pattern"),
            heading: Regex::new(r"(?m)^#{1,6}[ \t]+").expect("heading pattern"),
            blank_runs: Regex::new(r"\n{3,}").expect("blank run pattern"),
        })
    }
}

/// Converts OCR/markdown output into plain text.
///
/// Images are dropped, links keep only their label, heading markers are removed and runs of
/// three or more newlines collapse to a single blank line. Never fails; the result may be empty.
pub fn normalize_markdown(input: &str) -> String {
    let patterns = Patterns::get();
    let text = input.replace("\r\n", "\n");
    let text = patterns.image.replace_all(&text, "");
    let text = patterns.link.replace_all(&text, "$1");
    let text = patterns.heading.replace_all(&text, "");
    let text = patterns.blank_runs.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Whitespace-delimited word count used by the chunking thresholds.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncates `text` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_markdown_decorations() {
        let input = "# Catalog\n\n![logo](https://cdn/logo.png)\nSee [the guide](https://x.y/guide) for details.\n\n\n\n## Prices\nAll in EUR.";
        assert_eq!(
            normalize_markdown(input),
            "Catalog\n\nSee the guide for details.\n\nPrices\nAll in EUR."
        );
    }

    #[test]
    fn keeps_hash_without_space() {
        assert_eq!(normalize_markdown("#hashtag stays"), "#hashtag stays");
        assert_eq!(normalize_markdown("####### seven"), "####### seven");
    }

    #[test]
    fn empty_and_whitespace_inputs_yield_empty() {
        assert_eq!(normalize_markdown(""), "");
        assert_eq!(normalize_markdown(" \r\n\r\n\r\n "), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(word_count("  one two\nthree "), 3);
    }
}
