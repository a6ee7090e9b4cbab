use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::{Chunk, ChunkMetadata, ChunkType, ChunkingConfig};
use crate::normalizer::word_count;

fn paragraph_break() -> &'static Regex {
    static BREAK: OnceLock<Regex> = OnceLock::new();
    BREAK.get_or_init(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break pattern"))
}

/// Greedy paragraph packing with a hard word-window fallback for a lone oversized chunk.
pub(super) fn chunk(
    text: &str,
    source_name: &str,
    config: &ChunkingConfig,
    processed_at: DateTime<Utc>,
) -> Vec<Chunk> {
    let target = config.target_words.max(1);
    let mut packed: Vec<(String, usize)> = Vec::new();
    let mut buffer = String::new();
    let mut buffer_words = 0usize;

    for paragraph in paragraph_break()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
    {
        let words = word_count(paragraph);
        if buffer_words + words > target && !buffer.is_empty() {
            packed.push((std::mem::take(&mut buffer), buffer_words));
            buffer.push_str(paragraph);
            buffer_words = words;
            continue;
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(paragraph);
        buffer_words += words;
    }
    if !buffer.is_empty() {
        packed.push((buffer, buffer_words));
    }

    if packed.len() == 1 && packed[0].1 > config.hard_split_words {
        packed = hard_split(text, target);
    }

    packed
        .into_iter()
        .enumerate()
        .map(|(chunk_index, (content, words))| Chunk {
            content,
            metadata: ChunkMetadata {
                source_name: source_name.to_string(),
                chunk_index,
                chunk_type: ChunkType::Paragraph,
                word_count: Some(words),
                product_count: None,
                total_products: None,
                processed_at,
            },
        })
        .collect()
}

fn hard_split(text: &str, window: usize) -> Vec<(String, usize)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(window)
        .map(|slice| (slice.join(" "), slice.len()))
        .collect()
}
