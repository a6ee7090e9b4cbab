//! Document ingestion: normalize pages, chunk, embed sequentially, persist.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::IngestConfig;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::normalizer::normalize_markdown;
use crate::store::{DocumentRecord, DocumentStore, ProcessingStatus};

/// Trigger sent by the extraction pipeline once page text is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Record to fill; becomes chunk zero.
    pub document_id: String,
    /// Owning knowledge base; blank means "whatever the record says".
    #[serde(default)]
    pub knowledge_base_id: String,
    /// Name stamped into chunk metadata.
    pub source_name: String,
    /// Extracted page text, markdown allowed.
    #[serde(default)]
    pub pages: Vec<String>,
}

/// Result for one chunk of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    /// Zero-based chunk position.
    pub chunk_index: usize,
    /// `completed`, `failed`, or `pending` when never attempted.
    pub status: ProcessingStatus,
    /// Record that holds the chunk once stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    /// Failure text for this chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary returned to the ingestion trigger.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    /// Parent record id.
    pub document_id: String,
    /// Final record status.
    pub status: ProcessingStatus,
    /// Chunks produced by the chunker.
    pub chunks_total: usize,
    /// Chunks embedded and stored.
    pub chunks_embedded: usize,
    /// One entry per chunk, in index order.
    pub per_chunk_status: Vec<ChunkOutcome>,
    /// Error recorded on the parent record, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ingestion engine over an embedder and a document store.
#[derive(Clone)]
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn DocumentStore>,
    chunker: Chunker,
    config: IngestConfig,
}

impl Ingestor {
    /// Wires the engine to its collaborators.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn DocumentStore>,
        chunker: Chunker,
        config: IngestConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            chunker,
            config,
        }
    }

    /// Processes one document end to end.
    ///
    /// Validation and not-found errors are returned. Embedding and storage failures are
    /// recorded on the document and reported, not returned. Safe to re-run: chunk zero is
    /// rewritten in place and siblings are upserted under deterministic ids.
    pub async fn process(&self, request: &IngestRequest) -> Result<IngestReport> {
        let document_id = request.document_id.trim();
        if document_id.is_empty() {
            return Err(RagError::validation("documentId is required"));
        }
        let parent = self.store.document(document_id).await?;
        let knowledge_base_id = request.knowledge_base_id.trim();
        if !knowledge_base_id.is_empty() && knowledge_base_id != parent.knowledge_base_id {
            return Err(RagError::validation(format!(
                "document {document_id} does not belong to knowledge base {knowledge_base_id}"
            )));
        }
        let source_name = match request.source_name.trim() {
            "" => parent.source_name.clone().unwrap_or_else(|| parent.id.clone()),
            name => name.to_string(),
        };

        self.store
            .set_status(&parent.id, ProcessingStatus::Processing, None)
            .await?;

        let text = request
            .pages
            .iter()
            .map(|page| normalize_markdown(page))
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = self.chunker.chunk(&text, &source_name);
        if chunks.is_empty() {
            let message = "document has no extractable text".to_string();
            self.store
                .set_status(&parent.id, ProcessingStatus::Failed, Some(&message))
                .await?;
            warn!(document = %parent.id, "{message}");
            return Ok(IngestReport {
                document_id: parent.id,
                status: ProcessingStatus::Failed,
                chunks_total: 0,
                chunks_embedded: 0,
                per_chunk_status: Vec::new(),
                error: Some(message),
            });
        }

        let outcomes = self.embed_chunks(&parent, &chunks).await;
        let chunks_embedded = outcomes
            .iter()
            .filter(|outcome| outcome.status == ProcessingStatus::Completed)
            .count();
        let (status, error) = match outcomes.first() {
            Some(first) if first.status == ProcessingStatus::Completed => {
                (ProcessingStatus::Completed, None)
            }
            first => (
                ProcessingStatus::Failed,
                Some(
                    first
                        .and_then(|outcome| outcome.error.clone())
                        .unwrap_or_else(|| "chunk 0 was not stored".to_string()),
                ),
            ),
        };
        self.store
            .set_status(&parent.id, status, error.as_deref())
            .await?;

        info!(
            document = %parent.id,
            chunks = chunks.len(),
            embedded = chunks_embedded,
            %status,
            "document processed"
        );
        Ok(IngestReport {
            document_id: parent.id,
            status,
            chunks_total: chunks.len(),
            chunks_embedded,
            per_chunk_status: outcomes,
            error,
        })
    }

    /// Embeds chunks one at a time. A chunk-zero failure stops the run, since siblings
    /// would point at a parent without content.
    async fn embed_chunks(&self, parent: &DocumentRecord, chunks: &[Chunk]) -> Vec<ChunkOutcome> {
        let mut outcomes = Vec::with_capacity(chunks.len());
        let mut halted = false;
        for (position, chunk) in chunks.iter().enumerate() {
            if halted {
                outcomes.push(ChunkOutcome {
                    chunk_index: chunk.index(),
                    status: ProcessingStatus::Pending,
                    record_id: None,
                    error: None,
                });
                continue;
            }
            if position > 0 && !self.config.inter_call_delay.is_zero() {
                tokio::time::sleep(self.config.inter_call_delay).await;
            }
            match self.store_chunk(parent, chunk).await {
                Ok(record_id) => outcomes.push(ChunkOutcome {
                    chunk_index: chunk.index(),
                    status: ProcessingStatus::Completed,
                    record_id: Some(record_id),
                    error: None,
                }),
                Err(err) => {
                    warn!(
                        document = %parent.id,
                        chunk = chunk.index(),
                        error = %err,
                        "chunk embedding failed"
                    );
                    halted = chunk.index() == 0;
                    outcomes.push(ChunkOutcome {
                        chunk_index: chunk.index(),
                        status: ProcessingStatus::Failed,
                        record_id: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        outcomes
    }

    async fn store_chunk(&self, parent: &DocumentRecord, chunk: &Chunk) -> Result<String> {
        let embedding = self
            .embedder
            .embed(&chunk.content, &self.config.ingestion_profile)
            .await?;
        if chunk.index() == 0 {
            self.store
                .write_chunk_zero(&parent.id, chunk, &embedding)
                .await?;
            Ok(parent.id.clone())
        } else {
            self.store.upsert_sibling(parent, chunk, &embedding).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{EmbeddingProfile, EmbeddingVector};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails for any chunk index listed in `fail_on`, counted by call order.
    struct FlakyEmbedder {
        fail_on: HashSet<usize>,
        calls: Mutex<usize>,
    }

    impl FlakyEmbedder {
        fn new(fail_on: &[usize]) -> Self {
            Self {
                fail_on: fail_on.iter().copied().collect(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, _text: &str, profile: &EmbeddingProfile) -> Result<EmbeddingVector> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls - 1
            };
            if self.fail_on.contains(&call) {
                return Err(RagError::embedding("(500 Internal Server Error): upstream"));
            }
            EmbeddingVector::try_new(vec![0.5; profile.dims.get()], profile.dims)
        }
    }

    fn config() -> IngestConfig {
        IngestConfig {
            inter_call_delay: Duration::ZERO,
            ..IngestConfig::default()
        }
    }

    fn pages(paragraphs: usize) -> Vec<String> {
        let paragraph = vec!["word"; 250].join(" ");
        vec![vec![paragraph; paragraphs].join("\n\n")]
    }

    async fn setup(fail_on: &[usize]) -> (Arc<MemoryStore>, Ingestor) {
        let store = Arc::new(MemoryStore::new());
        store
            .put_document(DocumentRecord::pending("doc-1", "kb-1"), None)
            .await;
        let ingestor = Ingestor::new(
            Arc::new(FlakyEmbedder::new(fail_on)),
            store.clone(),
            Chunker::default(),
            config(),
        );
        (store, ingestor)
    }

    fn request(pages: Vec<String>) -> IngestRequest {
        IngestRequest {
            document_id: "doc-1".into(),
            knowledge_base_id: "kb-1".into(),
            source_name: "manual.pdf".into(),
            pages,
        }
    }

    #[tokio::test]
    async fn sibling_failure_keeps_document_completed() {
        let (store, ingestor) = setup(&[1]).await;
        let report = ingestor.process(&request(pages(8))).await.unwrap();
        assert_eq!(report.chunks_total, 3);
        assert_eq!(report.chunks_embedded, 2);
        assert_eq!(report.status, ProcessingStatus::Completed);
        assert_eq!(report.per_chunk_status[1].status, ProcessingStatus::Failed);
        let parent = store.document("doc-1").await.unwrap();
        assert_eq!(parent.status, ProcessingStatus::Completed);
        assert_eq!(parent.chunk_index, Some(0));
        assert!(store.document("doc-1#2").await.is_ok());
        assert!(store.document("doc-1#1").await.is_err());
    }

    #[tokio::test]
    async fn chunk_zero_failure_fails_document_and_stops() {
        let (store, ingestor) = setup(&[0]).await;
        let report = ingestor.process(&request(pages(8))).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);
        assert_eq!(report.chunks_embedded, 0);
        assert_eq!(report.per_chunk_status[2].status, ProcessingStatus::Pending);
        let parent = store.document("doc-1").await.unwrap();
        assert_eq!(parent.status, ProcessingStatus::Failed);
        assert!(parent.error_message.unwrap().contains("upstream"));
        assert_eq!(store.embedding_len("doc-1").await, None);
    }

    #[tokio::test]
    async fn empty_pages_fail_with_message() {
        let (store, ingestor) = setup(&[]).await;
        let report = ingestor
            .process(&request(vec!["![scan](p1.png)".into(), "   ".into()]))
            .await
            .unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);
        assert_eq!(report.chunks_total, 0);
        let parent = store.document("doc-1").await.unwrap();
        assert_eq!(parent.error_message.as_deref(), Some("document has no extractable text"));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let (_, ingestor) = setup(&[]).await;
        let mut req = request(pages(1));
        req.document_id = "missing".into();
        let err = ingestor.process(&req).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound { .. }));
    }

    #[tokio::test]
    async fn knowledge_base_mismatch_is_rejected() {
        let (_, ingestor) = setup(&[]).await;
        let mut req = request(pages(1));
        req.knowledge_base_id = "kb-other".into();
        let err = ingestor.process(&req).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));
    }
}
