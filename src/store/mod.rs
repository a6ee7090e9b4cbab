//! Datastore records and the collaborator traits the engines call into.

mod memory;
mod pg;
mod table;

pub use memory::MemoryStore;
pub use pg::{PgStore, PgTables};
pub use table::TableName;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chunker::Chunk;
use crate::embedder::EmbeddingVector;
use crate::error::{RagError, Result};

/// Lifecycle of a document record or a queued work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Waiting to be picked up.
    Pending,
    /// Currently being chunked or embedded.
    Processing,
    /// At least one chunk (or the item itself) was embedded and stored.
    Completed,
    /// Processing stopped; the record carries an error message.
    Failed,
}

impl ProcessingStatus {
    /// Column value used by the SQL backend.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(RagError::datastore(format!("unknown status {other:?}"))),
        }
    }
}

/// One uploaded or scraped source, doubling as its own chunk zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Primary key.
    pub id: String,
    /// Knowledge base that owns the record.
    pub knowledge_base_id: String,
    /// Shared identifier linking a parent and its sibling chunks.
    pub source_id: Option<String>,
    /// Back-reference from a sibling chunk to its parent record.
    pub parent_id: Option<String>,
    /// Source document name.
    pub source_name: Option<String>,
    /// Chunk text once processed.
    pub content: Option<String>,
    /// Position within the source document.
    pub chunk_index: Option<usize>,
    /// Chunk metadata as stored.
    pub metadata: Value,
    /// Free-form tags used by retrieval filtering and scoring.
    pub tags: Vec<String>,
    /// Short human description.
    pub description: Option<String>,
    /// When the knowledge applies.
    pub usage_context: Option<String>,
    /// Line-oriented hints surfaced as suggestions.
    pub usage_instructions: Option<String>,
    /// Worked dialogue examples, if any.
    pub dialogue_examples: Option<Value>,
    /// Lifecycle state.
    pub status: ProcessingStatus,
    /// Failure description when `status` is `failed`.
    pub error_message: Option<String>,
}

impl DocumentRecord {
    /// Creates a pending record with no content yet.
    pub fn pending(id: impl Into<String>, knowledge_base_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            source_id: None,
            parent_id: None,
            source_name: None,
            content: None,
            chunk_index: None,
            metadata: Value::Object(Default::default()),
            tags: Vec::new(),
            description: None,
            usage_context: None,
            usage_instructions: None,
            dialogue_examples: None,
            status: ProcessingStatus::Pending,
            error_message: None,
        }
    }

    /// Identifier shared by the record and its siblings.
    pub fn source_key(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.id)
    }

    /// Deterministic id for the sibling holding `chunk_index`.
    pub fn sibling_id(&self, chunk_index: usize) -> String {
        format!("{}#{}", self.source_key(), chunk_index)
    }
}

/// Similarity search request scoped to one agent.
#[derive(Debug, Clone, Copy)]
pub struct SearchQuery<'a> {
    /// Query vector.
    pub embedding: &'a EmbeddingVector,
    /// Agent whose knowledge bases are searched.
    pub agent_id: &'a str,
    /// Minimum similarity (exclusive).
    pub threshold: f32,
    /// Maximum number of candidates.
    pub limit: usize,
}

/// A stored passage returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Record id.
    pub id: String,
    /// Passage text.
    pub content: String,
    /// Similarity in `[0, 1]`.
    pub similarity: f32,
    /// Stored chunk metadata.
    pub metadata: Value,
    /// Record tags.
    pub tags: Vec<String>,
    /// Short human description.
    pub description: Option<String>,
    /// When the knowledge applies.
    pub usage_context: Option<String>,
    /// Line-oriented usage hints.
    pub usage_instructions: Option<String>,
    /// Worked dialogue examples.
    pub dialogue_examples: Option<Value>,
}

/// One passage waiting to be (re-)embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Queue item id.
    pub id: String,
    /// Record that receives the embedding.
    pub document_id: String,
    /// Text to embed.
    pub content: String,
    /// Current state.
    pub status: ProcessingStatus,
    /// Failure description when `status` is `failed`.
    pub error_message: Option<String>,
}

/// Nearest-neighbour search over stored passages.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Returns candidates above `threshold`, most similar first.
    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<Candidate>>;
}

/// CRUD for document records and their sibling chunks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Loads a record by id.
    async fn document(&self, id: &str) -> Result<DocumentRecord>;

    /// Moves a record to `status`, recording `error` when given.
    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Overwrites the parent record's own content and embedding with chunk zero.
    async fn write_chunk_zero(
        &self,
        id: &str,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<()>;

    /// Inserts or replaces the sibling for `chunk`, returning its id.
    async fn upsert_sibling(
        &self,
        parent: &DocumentRecord,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<String>;
}

/// Backlog of passages that still need an embedding.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Claims up to `limit` items, oldest first, moving them to `processing`.
    ///
    /// Pending items are eligible, as are items left `processing` for longer than
    /// `stale_after`. A claimed item is not handed to a concurrent caller.
    async fn dequeue(&self, limit: usize, stale_after: Duration) -> Result<Vec<WorkItem>>;

    /// Moves an item to `status`.
    async fn mark_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Persists the embedding produced for `item`.
    async fn store_embedding(&self, item: &WorkItem, embedding: &EmbeddingVector) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn sibling_ids_are_stable_per_source() {
        let mut record = DocumentRecord::pending("doc-1", "kb-1");
        assert_eq!(record.sibling_id(3), "doc-1#3");
        record.source_id = Some("upload-9".into());
        assert_eq!(record.sibling_id(3), "upload-9#3");
    }
}
