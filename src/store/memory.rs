//! In-process store used by tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    Candidate, DocumentRecord, DocumentStore, ProcessingStatus, SearchQuery, VectorIndex,
    WorkItem, WorkQueue,
};
use crate::chunker::Chunk;
use crate::embedder::EmbeddingVector;
use crate::error::{RagError, Result};

#[derive(Default)]
struct Inner {
    documents: BTreeMap<String, StoredDocument>,
    agent_links: HashMap<String, HashSet<String>>,
    queue: Vec<WorkItem>,
    claimed_at: HashMap<String, Instant>,
}

struct StoredDocument {
    record: DocumentRecord,
    embedding: Option<Vec<f32>>,
}

/// Brute-force cosine store implementing every collaborator trait.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `agent_id` search access to a knowledge base.
    pub async fn link_agent(&self, agent_id: &str, knowledge_base_id: &str) {
        self.inner
            .write()
            .await
            .agent_links
            .entry(agent_id.to_string())
            .or_default()
            .insert(knowledge_base_id.to_string());
    }

    /// Inserts or replaces a record, optionally with a precomputed embedding.
    pub async fn put_document(&self, record: DocumentRecord, embedding: Option<EmbeddingVector>) {
        self.inner.write().await.documents.insert(
            record.id.clone(),
            StoredDocument {
                record,
                embedding: embedding.map(EmbeddingVector::into_inner),
            },
        );
    }

    /// Appends a pending work item.
    pub async fn enqueue(&self, id: &str, document_id: &str, content: &str) {
        self.inner.write().await.queue.push(WorkItem {
            id: id.to_string(),
            document_id: document_id.to_string(),
            content: content.to_string(),
            status: ProcessingStatus::Pending,
            error_message: None,
        });
    }

    /// All records sharing `source_id`, ordered by chunk index.
    pub async fn chunks_for_source(&self, source_id: &str) -> Vec<DocumentRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<DocumentRecord> = inner
            .documents
            .values()
            .filter(|doc| doc.record.source_id.as_deref() == Some(source_id))
            .map(|doc| doc.record.clone())
            .collect();
        records.sort_by_key(|record| record.chunk_index);
        records
    }

    /// Length of the stored embedding for `id`, if any.
    pub async fn embedding_len(&self, id: &str) -> Option<usize> {
        self.inner
            .read()
            .await
            .documents
            .get(id)
            .and_then(|doc| doc.embedding.as_ref().map(Vec::len))
    }

    /// Snapshot of a queue item.
    pub async fn work_item(&self, id: &str) -> Option<WorkItem> {
        self.inner
            .read()
            .await
            .queue
            .iter()
            .find(|item| item.id == id)
            .cloned()
    }
}

#[async_trait]
impl VectorIndex for MemoryStore {
    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<Candidate>> {
        let inner = self.inner.read().await;
        let Some(knowledge_bases) = inner.agent_links.get(query.agent_id) else {
            return Ok(Vec::new());
        };
        let needle = query.embedding.as_slice();
        let mut hits: Vec<Candidate> = inner
            .documents
            .values()
            .filter(|doc| knowledge_bases.contains(&doc.record.knowledge_base_id))
            .filter_map(|doc| {
                let embedding = doc.embedding.as_ref()?;
                let content = doc.record.content.as_ref()?;
                if embedding.len() != needle.len() {
                    return None;
                }
                let similarity = cosine_similarity(needle, embedding);
                (similarity > query.threshold).then(|| Candidate {
                    id: doc.record.id.clone(),
                    content: content.clone(),
                    similarity,
                    metadata: doc.record.metadata.clone(),
                    tags: doc.record.tags.clone(),
                    description: doc.record.description.clone(),
                    usage_context: doc.record.usage_context.clone(),
                    usage_instructions: doc.record.usage_instructions.clone(),
                    dialogue_examples: doc.record.dialogue_examples.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(query.limit);
        Ok(hits)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn document(&self, id: &str) -> Result<DocumentRecord> {
        self.inner
            .read()
            .await
            .documents
            .get(id)
            .map(|doc| doc.record.clone())
            .ok_or_else(|| RagError::document_not_found(id))
    }

    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let doc = inner
            .documents
            .get_mut(id)
            .ok_or_else(|| RagError::document_not_found(id))?;
        doc.record.status = status;
        doc.record.error_message = error.map(str::to_string);
        Ok(())
    }

    async fn write_chunk_zero(
        &self,
        id: &str,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<()> {
        let metadata = serde_json::to_value(&chunk.metadata).map_err(RagError::datastore)?;
        let mut inner = self.inner.write().await;
        let doc = inner
            .documents
            .get_mut(id)
            .ok_or_else(|| RagError::document_not_found(id))?;
        doc.record.content = Some(chunk.content.clone());
        doc.record.chunk_index = Some(chunk.index());
        doc.record.source_name = Some(chunk.metadata.source_name.clone());
        doc.record.source_id = Some(doc.record.source_key().to_string());
        doc.record.metadata = metadata;
        doc.embedding = Some(embedding.as_slice().to_vec());
        Ok(())
    }

    async fn upsert_sibling(
        &self,
        parent: &DocumentRecord,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<String> {
        let metadata = serde_json::to_value(&chunk.metadata).map_err(RagError::datastore)?;
        let id = parent.sibling_id(chunk.index());
        let record = DocumentRecord {
            id: id.clone(),
            source_id: Some(parent.source_key().to_string()),
            parent_id: Some(parent.id.clone()),
            source_name: Some(chunk.metadata.source_name.clone()),
            content: Some(chunk.content.clone()),
            chunk_index: Some(chunk.index()),
            metadata,
            status: ProcessingStatus::Completed,
            error_message: None,
            ..parent.clone()
        };
        self.inner.write().await.documents.insert(
            id.clone(),
            StoredDocument {
                record,
                embedding: Some(embedding.as_slice().to_vec()),
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn dequeue(&self, limit: usize, stale_after: Duration) -> Result<Vec<WorkItem>> {
        let mut guard = self.inner.write().await;
        let Inner {
            queue, claimed_at, ..
        } = &mut *guard;
        let now = Instant::now();
        let mut claimed = Vec::new();
        for item in queue.iter_mut() {
            if claimed.len() == limit {
                break;
            }
            let eligible = match item.status {
                ProcessingStatus::Pending => true,
                ProcessingStatus::Processing => claimed_at
                    .get(&item.id)
                    .map_or(true, |at| now.duration_since(*at) >= stale_after),
                _ => false,
            };
            if eligible {
                item.status = ProcessingStatus::Processing;
                item.error_message = None;
                claimed_at.insert(item.id.clone(), now);
                claimed.push(item.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let item = inner
            .queue
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| RagError::NotFound {
                kind: "work item",
                id: id.to_string(),
            })?;
        item.status = status;
        item.error_message = error.map(str::to_string);
        if status == ProcessingStatus::Processing {
            inner.claimed_at.insert(id.to_string(), Instant::now());
        } else {
            inner.claimed_at.remove(id);
        }
        Ok(())
    }

    async fn store_embedding(&self, item: &WorkItem, embedding: &EmbeddingVector) -> Result<()> {
        let mut inner = self.inner.write().await;
        let doc = inner
            .documents
            .get_mut(&item.document_id)
            .ok_or_else(|| RagError::document_not_found(&item.document_id))?;
        doc.embedding = Some(embedding.as_slice().to_vec());
        Ok(())
    }
}

/// Cosine similarity clamped to `[0, 1]`.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::VectorDims;

    fn axis(weights: &[(usize, f32)]) -> EmbeddingVector {
        let mut values = vec![0.0; 1536];
        for &(idx, w) in weights {
            values[idx] = w;
        }
        EmbeddingVector::try_new(values, VectorDims::D1536).unwrap()
    }

    fn record(id: &str, kb: &str, content: &str) -> DocumentRecord {
        let mut record = DocumentRecord::pending(id, kb);
        record.content = Some(content.to_string());
        record
    }

    #[tokio::test]
    async fn search_is_scoped_to_linked_knowledge_bases() {
        let store = MemoryStore::new();
        store.link_agent("agent-a", "kb-1").await;
        store
            .put_document(record("d1", "kb-1", "mine"), Some(axis(&[(0, 1.0)])))
            .await;
        store
            .put_document(record("d2", "kb-2", "other"), Some(axis(&[(0, 1.0)])))
            .await;

        let query = axis(&[(0, 1.0)]);
        let hits = store
            .search(&SearchQuery {
                embedding: &query,
                agent_id: "agent-a",
                threshold: 0.5,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "d1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);

        let none = store
            .search(&SearchQuery {
                embedding: &query,
                agent_id: "agent-unknown",
                threshold: 0.0,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn threshold_and_limit_apply() {
        let store = MemoryStore::new();
        store.link_agent("a", "kb").await;
        store
            .put_document(record("near", "kb", "n"), Some(axis(&[(0, 1.0), (1, 0.2)])))
            .await;
        store
            .put_document(record("far", "kb", "f"), Some(axis(&[(0, 0.3), (1, 1.0)])))
            .await;
        let query = axis(&[(0, 1.0)]);
        let hits = store
            .search(&SearchQuery {
                embedding: &query,
                agent_id: "a",
                threshold: 0.0,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");

        let strict = store
            .search(&SearchQuery {
                embedding: &query,
                agent_id: "a",
                threshold: 0.5,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
    }
}
