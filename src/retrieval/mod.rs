//! Query-time retrieval: embed, search with relaxation, filter, score, and budget the context.

pub mod context;
pub mod policy;
pub mod request;
pub mod scoring;

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RetrievalConfig;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::store::{Candidate, SearchQuery, VectorIndex};

pub use context::{assemble_context, extract_suggestions, truncate_with_marker, TRUNCATION_MARKER};
pub use policy::{SearchOutcome, ThresholdPolicy};
pub use request::{RetrievalParams, RetrieveRequest, TagsInput, ThresholdInput};
pub use scoring::{passes_tag_filter, query_terms, relevance_score};

/// One ranked passage in a retrieval response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalResult {
    /// Record id.
    pub id: String,
    /// Passage text.
    pub content: String,
    /// Vector similarity in `[0, 1]`.
    pub similarity: f32,
    /// Ranking key in `[0, 1]`.
    #[serde(rename = "relevance_score")]
    pub relevance_score: f32,
    /// Stored chunk metadata.
    pub metadata: Value,
    /// Record tags.
    pub tags: Vec<String>,
    /// Short human description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the knowledge applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_context: Option<String>,
    /// Line-oriented usage hints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_instructions: Option<String>,
    /// Worked dialogue examples.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialogue_examples: Option<Value>,
}

impl RetrievalResult {
    fn from_candidate(candidate: Candidate, relevance_score: f32) -> Self {
        Self {
            id: candidate.id,
            content: candidate.content,
            similarity: candidate.similarity.clamp(0.0, 1.0),
            relevance_score,
            metadata: candidate.metadata,
            tags: candidate.tags,
            description: candidate.description,
            usage_context: candidate.usage_context,
            usage_instructions: candidate.usage_instructions,
            dialogue_examples: candidate.dialogue_examples,
        }
    }
}

/// Context, ranked documents and suggestions for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResponse {
    /// Query as resolved.
    pub query: String,
    /// Budgeted context string.
    pub context: String,
    /// Ranked results, content cut for payload size.
    pub documents: Vec<RetrievalResult>,
    /// Mean relevance of `documents`, 0 when empty.
    pub relevance_score: f32,
    /// Usage-instruction lines worth surfacing.
    pub suggestions: Vec<String>,
    /// `documents.len()`.
    pub count: usize,
    /// Upstream failure that degraded this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetrievalResponse {
    /// "No knowledge found" outcome.
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: String::new(),
            documents: Vec::new(),
            relevance_score: 0.0,
            suggestions: Vec::new(),
            count: 0,
            error: None,
        }
    }

    /// Empty outcome that records the failure which caused it.
    pub fn degraded(query: impl Into<String>, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::empty(query)
        }
    }

    /// True when no document was returned.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Retrieval engine over an embedder and a vector index.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl Retriever {
    /// Wires the engine to its collaborators.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Validates `request` and runs it.
    ///
    /// Only validation failures are returned as errors; upstream failures degrade to an
    /// empty response carrying `error`.
    pub async fn retrieve(&self, request: &RetrieveRequest) -> Result<RetrievalResponse> {
        let params = request.normalize(&self.config)?;
        Ok(self.retrieve_params(&params).await)
    }

    /// Runs already-normalized parameters. Never fails.
    pub async fn retrieve_params(&self, params: &RetrievalParams) -> RetrievalResponse {
        let embedding = match self.embedder.embed(&params.query, &self.config.profile).await {
            Ok(embedding) => embedding,
            Err(err) => {
                warn!(agent = %params.agent_id, error = %err, "query embedding failed");
                return RetrievalResponse::degraded(&params.query, err);
            }
        };

        let policy = ThresholdPolicy::new(params.threshold, self.config.fallback_threshold);
        let limit = params.top_k * self.config.candidate_multiplier.max(1);
        let index = &self.index;
        let embedding = &embedding;
        let agent_id = params.agent_id.as_str();
        let outcome = policy
            .run(move |threshold| {
                let query = SearchQuery {
                    embedding,
                    agent_id,
                    threshold,
                    limit,
                };
                async move { index.search(&query).await }
            })
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(agent = %params.agent_id, error = %err, "similarity search failed");
                return RetrievalResponse::degraded(&params.query, err);
            }
        };
        if outcome.relaxed {
            debug!(
                primary = params.threshold,
                fallback = outcome.threshold,
                "relaxed similarity threshold"
            );
        }

        let response = self.rank(params, outcome.candidates);
        info!(
            agent = %params.agent_id,
            threshold = outcome.threshold,
            relaxed = outcome.relaxed,
            count = response.count,
            "retrieval complete"
        );
        response
    }

    fn rank(&self, params: &RetrievalParams, candidates: Vec<Candidate>) -> RetrievalResponse {
        let terms = query_terms(&params.query);
        let mut results: Vec<RetrievalResult> = candidates
            .into_iter()
            .filter(|candidate| passes_tag_filter(&candidate.tags, &params.tags))
            .map(|candidate| {
                let score = if params.use_metadata_scoring {
                    relevance_score(&candidate, &terms, &self.config.weights)
                } else {
                    candidate.similarity.clamp(0.0, 1.0)
                };
                RetrievalResult::from_candidate(candidate, score)
            })
            .collect();
        if results.is_empty() {
            return RetrievalResponse::empty(&params.query);
        }

        results.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(Ordering::Equal)
        });
        results.truncate(params.top_k);

        let context = assemble_context(&params.query, &results, &self.config.budget);
        let suggestions = extract_suggestions(&results, &self.config.suggestions);
        let relevance_score =
            results.iter().map(|r| r.relevance_score).sum::<f32>() / results.len() as f32;
        let max_doc_chars = self.config.budget.max_doc_chars;
        let documents: Vec<RetrievalResult> = results
            .into_iter()
            .map(|mut result| {
                result.content = truncate_with_marker(&result.content, max_doc_chars);
                result
            })
            .collect();

        RetrievalResponse {
            query: params.query.clone(),
            context,
            count: documents.len(),
            documents,
            relevance_score,
            suggestions,
            error: None,
        }
    }
}
