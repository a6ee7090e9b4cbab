#![warn(missing_docs)]
//! Knowledge-base RAG core: chunk documents, embed passages, and serve budgeted context
//! to conversational agents.

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod normalizer;
pub mod queue;
pub mod retrieval;
pub mod server;
pub mod store;

pub use chunker::{chunk, Chunk, ChunkMetadata, ChunkStrategy, ChunkType, Chunker, ChunkingConfig};
pub use config::{ContextBudget, IngestConfig, RetrievalConfig, ScoringWeights, SuggestionLimits};
pub use embedder::{Embedder, EmbeddingProfile, EmbeddingVector, VectorDims};
pub use error::{RagError, Result};
pub use ingest::{ChunkOutcome, IngestReport, IngestRequest, Ingestor};
pub use normalizer::normalize_markdown;
pub use queue::{DrainReport, QueueWorker};
pub use retrieval::{
    RetrievalParams, RetrievalResponse, RetrievalResult, RetrieveRequest, Retriever,
    ThresholdPolicy,
};
pub use server::{router, AppState};
pub use store::{
    Candidate, DocumentRecord, DocumentStore, MemoryStore, PgStore, ProcessingStatus,
    SearchQuery, VectorIndex, WorkItem, WorkQueue,
};
