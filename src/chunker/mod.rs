//! Splits normalized document text into retrieval-sized passages.
//!
//! Two strategies exist: line-item/tabular documents are re-chunked in fixed row batches with
//! their header repeated, everything else is packed paragraph by paragraph up to a word target.
//! [`ChunkStrategy::classify`] picks between them and is a pure function of the text.

mod prose;
mod tabular;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of passage produced by the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Greedily packed prose paragraphs.
    Paragraph,
    /// A batch of data rows from a tabular/list document, header included.
    ProductList,
}

/// Metadata persisted alongside every chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    /// Human-readable name of the source document.
    pub source_name: String,
    /// Zero-based position within the source document.
    pub chunk_index: usize,
    /// Strategy that produced the chunk.
    pub chunk_type: ChunkType,
    /// Word count (prose chunks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    /// Rows carried by this chunk (tabular chunks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_count: Option<usize>,
    /// Rows in the whole source document (tabular chunks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_products: Option<usize>,
    /// When the chunk was produced.
    pub processed_at: DateTime<Utc>,
}

/// A bounded passage of text derived from one source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Passage text; never empty.
    pub content: String,
    /// Provenance and sizing metadata.
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Zero-based index of the chunk within its document.
    pub fn index(&self) -> usize {
        self.metadata.chunk_index
    }
}

/// Size limits used by both strategies.
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    /// Soft word ceiling for packed prose chunks.
    pub target_words: usize,
    /// A lone prose chunk above this many words is re-split into fixed word windows.
    pub hard_split_words: usize,
    /// Data rows per tabular chunk.
    pub rows_per_chunk: usize,
    /// Non-blank lines required before a document can be treated as tabular.
    pub min_tabular_lines: usize,
    /// Leading lines inspected for a header pattern during classification.
    pub classify_window: usize,
    /// Leading lines scanned for the end of the header region.
    pub header_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_words: 750,
            hard_split_words: 900,
            rows_per_chunk: 15,
            min_tabular_lines: 5,
            classify_window: 5,
            header_window: 10,
        }
    }
}

/// Chunking strategy selected for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Header + fixed row batches.
    Tabular,
    /// Greedy paragraph packing.
    Prose,
}

impl ChunkStrategy {
    /// Classifies `text` using the default thresholds.
    pub fn classify(text: &str) -> Self {
        Self::classify_with(text, &ChunkingConfig::default())
    }

    /// Classifies `text` as tabular when it is long enough and opens with a recognizable header.
    pub fn classify_with(text: &str, config: &ChunkingConfig) -> Self {
        let lines: Vec<&str> = non_blank_lines(text).collect();
        if lines.len() >= config.min_tabular_lines
            && lines
                .iter()
                .take(config.classify_window)
                .any(|line| tabular::is_header_line(line))
        {
            Self::Tabular
        } else {
            Self::Prose
        }
    }

    /// Runs the strategy over `text`.
    pub fn chunk(self, text: &str, source_name: &str, config: &ChunkingConfig) -> Vec<Chunk> {
        let processed_at = Utc::now();
        match self {
            Self::Tabular => tabular::chunk(text, source_name, config, processed_at)
                .unwrap_or_else(|| prose::chunk(text, source_name, config, processed_at)),
            Self::Prose => prose::chunk(text, source_name, config, processed_at),
        }
    }
}

/// Stateless chunking service.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Builds a chunker with explicit limits.
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    /// Splits normalized text into chunks with contiguous zero-based indexes.
    pub fn chunk(&self, text: &str, source_name: &str) -> Vec<Chunk> {
        ChunkStrategy::classify_with(text, &self.config).chunk(text, source_name, &self.config)
    }
}

/// Splits `text` with the default limits.
pub fn chunk(text: &str, source_name: &str) -> Vec<Chunk> {
    Chunker::default().chunk(text, source_name)
}

fn non_blank_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
}
