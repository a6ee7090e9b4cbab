use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::{non_blank_lines, Chunk, ChunkMetadata, ChunkType, ChunkingConfig};

fn header_patterns() -> &'static [Regex; 4] {
    static PATTERNS: OnceLock<[Regex; 4]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // code / item
            Regex::new(r"(?i)\b(c[oó]digo|code|item|art[ií]culo)\b").expect("code pattern"),
            Regex::new(r"(?i)\b(descripci[oó]n|description|desc)\b").expect("description pattern"),
            // line / sub-line
            Regex::new(r"(?i)\b(sub-?)?(l[ií]nea|line)\b").expect("line pattern"),
            Regex::new(r"(?i)\b(precio|price|pvp)\b").expect("price pattern"),
        ]
    })
}

/// Amounts like `4.50` or `12,99`, and codes like `ITEM-7` or `Código 12`.
fn data_cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\d[.,]\d{2}\b|\b(c[oó]digo|code|item|art[ií]culo)[-_#: ]?\d")
            .expect("data cell pattern")
    })
}

/// True when the line looks like a column header of a line-item listing.
///
/// Lines carrying an amount or a numbered code are data rows even when a header token
/// appears in them.
pub(super) fn is_header_line(line: &str) -> bool {
    !data_cell_pattern().is_match(line)
        && header_patterns().iter().any(|pattern| pattern.is_match(line))
}

fn is_separator(line: &str) -> bool {
    line.contains("---") || line.contains("===")
}

fn is_header_region_line(line: &str) -> bool {
    is_separator(line) || is_header_line(line)
}

/// Index of the last header line: the run of header or separator lines that starts at the
/// first one inside the window. Without any, the first line is the header.
fn header_end(lines: &[&str], window: usize) -> usize {
    let window = lines.len().min(window);
    let Some(start) = (0..window).find(|&idx| is_header_region_line(lines[idx])) else {
        return 0;
    };
    (start..window)
        .take_while(|&idx| is_header_region_line(lines[idx]))
        .last()
        .unwrap_or(start)
}

/// Re-chunks a tabular document into header-prefixed row batches.
///
/// Returns `None` when the document has no data rows after its header region, so the caller
/// can fall back to prose packing.
pub(super) fn chunk(
    text: &str,
    source_name: &str,
    config: &ChunkingConfig,
    processed_at: DateTime<Utc>,
) -> Option<Vec<Chunk>> {
    let lines: Vec<&str> = non_blank_lines(text).collect();
    if lines.is_empty() {
        return None;
    }
    let header_end = header_end(&lines, config.header_window);
    let header = lines[..=header_end].join("\n");
    let rows = &lines[header_end + 1..];
    if rows.is_empty() {
        return None;
    }

    let total_rows = rows.len();
    let chunks = rows
        .chunks(config.rows_per_chunk.max(1))
        .enumerate()
        .map(|(chunk_index, batch)| Chunk {
            content: format!("{header}\n{}", batch.join("\n")),
            metadata: ChunkMetadata {
                source_name: source_name.to_string(),
                chunk_index,
                chunk_type: ChunkType::ProductList,
                word_count: None,
                product_count: Some(batch.len()),
                total_products: Some(total_rows),
                processed_at,
            },
        })
        .collect();
    Some(chunks)
}
