//! Tunables for retrieval and ingestion plus the clap arguments that build them.

use std::time::Duration;

use clap::Args;

use crate::embedder::openai::OpenAiEmbedder;
use crate::embedder::{EmbeddingProfile, DEFAULT_LARGE_MODEL, DEFAULT_SMALL_MODEL};
use crate::retrieval::TRUNCATION_MARKER;
use crate::store::{PgStore, PgTables, TableName};

/// Hard character limits applied while assembling the context string.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBudget {
    /// Highest-ranked documents eligible for the context string.
    pub max_docs_in_context: usize,
    /// Per-document content cap (a truncation marker is appended when cut).
    pub max_doc_chars: usize,
    /// Description snippet prefixed to a document.
    pub description_chars: usize,
    /// Usage-context snippet suffixed to a document.
    pub usage_context_chars: usize,
    /// Cap on the whole context string, marker included.
    pub max_context_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_docs_in_context: 1,
            max_doc_chars: 500,
            description_chars: 50,
            usage_context_chars: 80,
            max_context_chars: 3000,
        }
    }
}

/// Bounds for suggestions pulled from usage instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct SuggestionLimits {
    /// Shortest line kept, in characters.
    pub min_chars: usize,
    /// Longest line kept, in characters.
    pub max_chars: usize,
    /// Suggestions returned across all documents.
    pub max_suggestions: usize,
}

impl Default for SuggestionLimits {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_chars: 200,
            max_suggestions: 3,
        }
    }
}

/// Bonus weights added on top of vector similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    /// Query-term overlap with the description.
    pub description: f32,
    /// Query-term overlap with tags.
    pub tags: f32,
    /// Query-term overlap with the usage context.
    pub usage_context: f32,
    /// Flat bonus for documents carrying dialogue examples.
    pub dialogue_examples: f32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            description: 0.10,
            tags: 0.15,
            usage_context: 0.10,
            dialogue_examples: 0.05,
        }
    }
}

/// Query-time settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// `topK` when the request omits it.
    pub default_top_k: usize,
    /// Upper clamp for `topK`.
    pub max_top_k: usize,
    /// Threshold when the request omits it or sends garbage.
    pub default_threshold: f32,
    /// Second-attempt threshold when the first search is empty.
    pub fallback_threshold: f32,
    /// Candidates requested per returned document.
    pub candidate_multiplier: usize,
    /// Profile used to embed queries.
    pub profile: EmbeddingProfile,
    /// Relevance bonus weights.
    pub weights: ScoringWeights,
    /// Context size limits.
    pub budget: ContextBudget,
    /// Suggestion extraction bounds.
    pub suggestions: SuggestionLimits,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 10,
            default_threshold: 0.4,
            fallback_threshold: 0.2,
            candidate_multiplier: 2,
            profile: EmbeddingProfile::query(),
            weights: ScoringWeights::default(),
            budget: ContextBudget::default(),
            suggestions: SuggestionLimits::default(),
        }
    }
}

/// Ingestion and backlog settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Pause between successive embedding calls.
    pub inter_call_delay: Duration,
    /// Ceiling on items drained per invocation.
    pub max_drain_batch: usize,
    /// Claimed items still `processing` after this long are handed out again.
    pub claim_timeout: Duration,
    /// Profile for document chunks.
    pub ingestion_profile: EmbeddingProfile,
    /// Profile for backlog items.
    pub incremental_profile: EmbeddingProfile,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            inter_call_delay: Duration::from_millis(100),
            max_drain_batch: 10,
            claim_timeout: Duration::from_secs(600),
            ingestion_profile: EmbeddingProfile::ingestion(),
            incremental_profile: EmbeddingProfile::incremental(),
        }
    }
}

/// Embedding service flags shared by the binaries.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// OpenAI API key used for embedding calls
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: String,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "KB_OPENAI_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Seconds before embedding requests time out
    #[arg(long, env = "KB_OPENAI_TIMEOUT_SECS", default_value_t = 30)]
    pub openai_timeout_secs: u64,

    /// 3072-dimension model used for documents and queries
    #[arg(long, env = "KB_EMBED_MODEL", default_value = DEFAULT_LARGE_MODEL)]
    pub embed_model: String,

    /// 1536-dimension model used for backlog re-embedding
    #[arg(long, env = "KB_EMBED_MODEL_SMALL", default_value = DEFAULT_SMALL_MODEL)]
    pub embed_model_small: String,
}

impl EmbedderArgs {
    /// Builds the HTTP embedding client.
    pub fn build_embedder(&self) -> anyhow::Result<OpenAiEmbedder> {
        OpenAiEmbedder::new(
            &self.openai_api_key,
            &self.openai_base_url,
            Duration::from_secs(self.openai_timeout_secs.max(1)),
        )
    }

    /// Applies the model overrides to ingestion settings.
    pub fn ingest_config(&self, inter_call_delay_ms: u64) -> IngestConfig {
        IngestConfig {
            inter_call_delay: Duration::from_millis(inter_call_delay_ms),
            ingestion_profile: EmbeddingProfile::ingestion().with_model(&self.embed_model),
            incremental_profile: EmbeddingProfile::incremental()
                .with_model(&self.embed_model_small),
            ..IngestConfig::default()
        }
    }
}

/// Postgres flags shared by the binaries.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Schema holding the knowledge tables
    #[arg(long, env = "KB_PG_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Table storing documents and their chunks
    #[arg(long, env = "KB_DOCUMENTS_TABLE", default_value = "documents")]
    pub documents_table: String,

    /// Table linking agents to knowledge bases
    #[arg(long, env = "KB_AGENT_LINK_TABLE", default_value = "agent_knowledge_bases")]
    pub agent_link_table: String,

    /// Table holding the re-embedding backlog
    #[arg(long, env = "KB_QUEUE_TABLE", default_value = "embedding_queue")]
    pub queue_table: String,

    /// Create the vector extension and tables automatically if missing
    #[arg(long, env = "KB_PG_PREPARE", default_value_t = false)]
    pub prepare_tables: bool,
}

impl StoreArgs {
    /// Resolves the qualified table names.
    pub fn tables(&self) -> anyhow::Result<PgTables> {
        Ok(PgTables {
            documents: TableName::new(&self.schema, &self.documents_table)?,
            agent_links: TableName::new(&self.schema, &self.agent_link_table)?,
            queue: TableName::new(&self.schema, &self.queue_table)?,
        })
    }

    /// Connects and optionally bootstraps the schema.
    pub async fn connect(&self) -> anyhow::Result<PgStore> {
        let store = PgStore::connect(&self.database_url, self.tables()?).await?;
        if self.prepare_tables {
            store.ensure_schema().await?;
        }
        Ok(store)
    }
}

/// Retrieval tuning flags.
#[derive(Args, Debug, Clone)]
pub struct RetrievalArgs {
    /// Default top-k when the client does not override it
    #[arg(long, env = "KB_DEFAULT_TOP_K", default_value_t = 5)]
    pub default_top_k: usize,

    /// Documents placed into the assembled context string
    #[arg(long, env = "KB_MAX_DOCS_IN_CONTEXT", default_value_t = 1)]
    pub max_docs_in_context: usize,

    /// Hard cap on the context string, in characters
    #[arg(long, env = "KB_CONTEXT_CHARS", default_value_t = 3000)]
    pub max_context_chars: usize,
}

impl RetrievalArgs {
    /// Builds retrieval settings using `query_model` for query embeddings.
    pub fn build_config(&self, query_model: &str) -> RetrievalConfig {
        let defaults = RetrievalConfig::default();
        RetrievalConfig {
            default_top_k: self.default_top_k.clamp(1, defaults.max_top_k),
            profile: EmbeddingProfile::query().with_model(query_model),
            budget: ContextBudget {
                max_docs_in_context: self.max_docs_in_context.max(1),
                max_context_chars: self.max_context_chars.max(TRUNCATION_MARKER.len() + 1),
                ..ContextBudget::default()
            },
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        retrieval: RetrievalArgs,
        #[command(flatten)]
        store: StoreArgs,
    }

    #[test]
    fn defaults_match_documented_budget() {
        let config = RetrievalConfig::default();
        assert_eq!(config.default_top_k, 5);
        assert_eq!(config.max_top_k, 10);
        assert_eq!(config.budget.max_docs_in_context, 1);
        assert_eq!(config.budget.max_context_chars, 3000);
        assert_eq!(IngestConfig::default().inter_call_delay, Duration::from_millis(100));
    }

    #[test]
    fn cli_flags_override_budget() {
        let cli = TestCli::parse_from([
            "test",
            "--database-url",
            "postgres://localhost/kb",
            "--max-docs-in-context",
            "3",
            "--default-top-k",
            "50",
            "--max-context-chars",
            "2",
        ]);
        let config = cli.retrieval.build_config("text-embedding-3-large");
        assert_eq!(config.budget.max_docs_in_context, 3);
        assert_eq!(config.default_top_k, 10);
        assert_eq!(config.budget.max_context_chars, 4);
        let tables = cli.store.tables().expect("tables");
        assert_eq!(tables.documents.qualified(), "\"public\".\"documents\"");
    }
}
