//! pgvector-backed implementation of the store traits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use pgvector::Vector;
use serde_json::Value;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error};

use super::{
    Candidate, DocumentRecord, DocumentStore, ProcessingStatus, SearchQuery, TableName,
    VectorIndex, WorkItem, WorkQueue,
};
use crate::chunker::Chunk;
use crate::embedder::EmbeddingVector;
use crate::error::{RagError, Result};

/// Tables used by [`PgStore`].
#[derive(Debug, Clone)]
pub struct PgTables {
    /// Document and chunk records.
    pub documents: TableName,
    /// `(agent_id, knowledge_base_id)` access links.
    pub agent_links: TableName,
    /// Re-embedding backlog.
    pub queue: TableName,
}

/// Store backed by a single Postgres connection with the `vector` extension.
#[derive(Clone)]
pub struct PgStore {
    client: Arc<Client>,
    tables: PgTables,
}

impl PgStore {
    /// Connects to Postgres and drives the connection on a background task.
    pub async fn connect(database_url: &str, tables: PgTables) -> anyhow::Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .context("failed to connect to Postgres")?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection error: {err}");
            }
        });
        Ok(Self {
            client: Arc::new(client),
            tables,
        })
    }

    /// Creates the extension, tables and indexes when missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let docs = self.tables.documents.qualified();
        let links = self.tables.agent_links.qualified();
        let queue = self.tables.queue.qualified();
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS {docs} (
                    id TEXT PRIMARY KEY,
                    knowledge_base_id TEXT NOT NULL,
                    source_id TEXT,
                    parent_id TEXT,
                    source_name TEXT,
                    chunk_index BIGINT,
                    content TEXT,
                    embedding VECTOR,
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    tags TEXT[] NOT NULL DEFAULT '{{}}',
                    description TEXT,
                    usage_context TEXT,
                    usage_instructions TEXT,
                    dialogue_examples JSONB,
                    status TEXT NOT NULL DEFAULT 'pending',
                    error_message TEXT,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {links} (
                    agent_id TEXT NOT NULL,
                    knowledge_base_id TEXT NOT NULL,
                    PRIMARY KEY (agent_id, knowledge_base_id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {queue} (
                    id TEXT PRIMARY KEY,
                    document_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    error_message TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {docs} (knowledge_base_id)",
                self.tables.documents.index_name("knowledge_base_id")
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {queue} (status, created_at)",
                self.tables.queue.index_name("status")
            ),
        ];
        for sql in statements {
            self.client
                .execute(&sql, &[])
                .await
                .with_context(|| format!("failed to apply schema statement: {sql}"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PgStore {
    async fn search(&self, query: &SearchQuery<'_>) -> Result<Vec<Candidate>> {
        let vector = Vector::from(query.embedding.as_slice().to_vec());
        let limit = as_i64(query.limit)?;
        let dims = as_i64(query.embedding.len())? as i32;
        let threshold = f64::from(query.threshold);
        debug!(agent = query.agent_id, threshold, limit, "pgvector search");
        let rows = self
            .client
            .query(
                search_sql(&self.tables).as_str(),
                &[&vector, &query.agent_id, &threshold, &limit, &dims],
            )
            .await?;
        rows.iter().map(candidate_from_row).collect()
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn document(&self, id: &str) -> Result<DocumentRecord> {
        let row = self
            .client
            .query_opt(document_sql(&self.tables).as_str(), &[&id])
            .await?
            .ok_or_else(|| RagError::document_not_found(id))?;
        document_from_row(&row)
    }

    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = $2, error_message = $3, updated_at = now() WHERE id = $1",
            self.tables.documents.qualified()
        );
        let updated = self
            .client
            .execute(sql.as_str(), &[&id, &status.as_str(), &error])
            .await?;
        ensure_found(updated, "document", id)
    }

    async fn write_chunk_zero(
        &self,
        id: &str,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET content = $2, embedding = $3, metadata = $4, chunk_index = 0, \
                source_name = $5, source_id = COALESCE(source_id, id), updated_at = now() \
            WHERE id = $1",
            self.tables.documents.qualified()
        );
        let vector = Vector::from(embedding.as_slice().to_vec());
        let updated = self
            .client
            .execute(
                sql.as_str(),
                &[
                    &id,
                    &chunk.content,
                    &vector,
                    &Json(&chunk.metadata),
                    &chunk.metadata.source_name,
                ],
            )
            .await?;
        ensure_found(updated, "document", id)
    }

    async fn upsert_sibling(
        &self,
        parent: &DocumentRecord,
        chunk: &Chunk,
        embedding: &EmbeddingVector,
    ) -> Result<String> {
        let sql = sibling_upsert_sql(&self.tables);
        let id = parent.sibling_id(chunk.index());
        let chunk_index = as_i64(chunk.index())?;
        let vector = Vector::from(embedding.as_slice().to_vec());
        self.client
            .execute(
                sql.as_str(),
                &[
                    &id,
                    &parent.knowledge_base_id,
                    &parent.source_key(),
                    &parent.id,
                    &chunk.metadata.source_name,
                    &chunk_index,
                    &chunk.content,
                    &vector,
                    &Json(&chunk.metadata),
                    &parent.tags,
                    &parent.description,
                    &parent.usage_context,
                    &parent.usage_instructions,
                    &parent.dialogue_examples,
                ],
            )
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl WorkQueue for PgStore {
    async fn dequeue(&self, limit: usize, stale_after: Duration) -> Result<Vec<WorkItem>> {
        let rows = self
            .client
            .query(
                claim_sql(&self.tables).as_str(),
                &[&as_i64(limit)?, &stale_after.as_secs_f64()],
            )
            .await?;
        rows.iter()
            .map(|row| -> Result<WorkItem> {
                let status: String = row.try_get("status")?;
                Ok(WorkItem {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    content: row.try_get("content")?,
                    status: status.parse()?,
                    error_message: row.try_get("error_message")?,
                })
            })
            .collect()
    }

    async fn mark_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = $2, error_message = $3, updated_at = now() WHERE id = $1",
            self.tables.queue.qualified()
        );
        let updated = self
            .client
            .execute(sql.as_str(), &[&id, &status.as_str(), &error])
            .await?;
        ensure_found(updated, "work item", id)
    }

    async fn store_embedding(&self, item: &WorkItem, embedding: &EmbeddingVector) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET embedding = $2, updated_at = now() WHERE id = $1",
            self.tables.documents.qualified()
        );
        let vector = Vector::from(embedding.as_slice().to_vec());
        let updated = self
            .client
            .execute(sql.as_str(), &[&item.document_id, &vector])
            .await?;
        ensure_found(updated, "document", &item.document_id)
    }
}

fn search_sql(tables: &PgTables) -> String {
    format!(
        "SELECT d.id, d.content, d.metadata, d.tags, d.description, d.usage_context, \
            d.usage_instructions, d.dialogue_examples, \
            1 - (d.embedding <=> $1) AS similarity \
        FROM {docs} d \
        JOIN {links} l ON l.knowledge_base_id = d.knowledge_base_id \
        WHERE l.agent_id = $2 \
            AND d.content IS NOT NULL \
            AND d.embedding IS NOT NULL \
            AND vector_dims(d.embedding) = $5 \
            AND 1 - (d.embedding <=> $1) > $3 \
        ORDER BY d.embedding <=> $1 ASC \
        LIMIT $4",
        docs = tables.documents.qualified(),
        links = tables.agent_links.qualified(),
    )
}

fn document_sql(tables: &PgTables) -> String {
    format!(
        "SELECT id, knowledge_base_id, source_id, parent_id, source_name, chunk_index, content, \
            metadata, tags, description, usage_context, usage_instructions, dialogue_examples, \
            status, error_message \
        FROM {} WHERE id = $1",
        tables.documents.qualified()
    )
}

fn sibling_upsert_sql(tables: &PgTables) -> String {
    format!(
        "INSERT INTO {} \
            (id, knowledge_base_id, source_id, parent_id, source_name, chunk_index, content, \
             embedding, metadata, tags, description, usage_context, usage_instructions, \
             dialogue_examples, status, error_message) \
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'completed', NULL) \
        ON CONFLICT (id) DO UPDATE SET \
            content = EXCLUDED.content, \
            embedding = EXCLUDED.embedding, \
            metadata = EXCLUDED.metadata, \
            source_name = EXCLUDED.source_name, \
            tags = EXCLUDED.tags, \
            description = EXCLUDED.description, \
            usage_context = EXCLUDED.usage_context, \
            usage_instructions = EXCLUDED.usage_instructions, \
            dialogue_examples = EXCLUDED.dialogue_examples, \
            status = 'completed', \
            error_message = NULL, \
            updated_at = now()",
        tables.documents.qualified()
    )
}

/// Moves claimable rows to `processing` in one statement. `SKIP LOCKED` keeps concurrent
/// drains from claiming the same row.
fn claim_sql(tables: &PgTables) -> String {
    format!(
        "WITH claimed AS ( \
            UPDATE {queue} SET status = 'processing', error_message = NULL, updated_at = now() \
            WHERE id IN ( \
                SELECT id FROM {queue} \
                WHERE status = 'pending' \
                    OR (status = 'processing' \
                        AND updated_at < now() - make_interval(secs => $2)) \
                ORDER BY created_at ASC \
                LIMIT $1 \
                FOR UPDATE SKIP LOCKED) \
            RETURNING id, document_id, content, status, error_message, created_at) \
        SELECT id, document_id, content, status, error_message FROM claimed \
        ORDER BY created_at ASC",
        queue = tables.queue.qualified()
    )
}

fn candidate_from_row(row: &Row) -> Result<Candidate> {
    let similarity: f64 = row.try_get("similarity")?;
    Ok(Candidate {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        similarity: similarity.clamp(0.0, 1.0) as f32,
        metadata: row.try_get("metadata")?,
        tags: row.try_get("tags")?,
        description: row.try_get("description")?,
        usage_context: row.try_get("usage_context")?,
        usage_instructions: row.try_get("usage_instructions")?,
        dialogue_examples: row.try_get::<_, Option<Value>>("dialogue_examples")?,
    })
}

fn document_from_row(row: &Row) -> Result<DocumentRecord> {
    let chunk_index: Option<i64> = row.try_get("chunk_index")?;
    let status: String = row.try_get("status")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        knowledge_base_id: row.try_get("knowledge_base_id")?,
        source_id: row.try_get("source_id")?,
        parent_id: row.try_get("parent_id")?,
        source_name: row.try_get("source_name")?,
        content: row.try_get("content")?,
        chunk_index: chunk_index.and_then(|idx| usize::try_from(idx).ok()),
        metadata: row.try_get("metadata")?,
        tags: row.try_get("tags")?,
        description: row.try_get("description")?,
        usage_context: row.try_get("usage_context")?,
        usage_instructions: row.try_get("usage_instructions")?,
        dialogue_examples: row.try_get("dialogue_examples")?,
        status: status.parse()?,
        error_message: row.try_get("error_message")?,
    })
}

fn ensure_found(updated: u64, kind: &'static str, id: &str) -> Result<()> {
    if updated == 0 {
        return Err(RagError::NotFound {
            kind,
            id: id.to_string(),
        });
    }
    Ok(())
}

fn as_i64(value: usize) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| RagError::datastore(anyhow!("value {value} exceeds i64 range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> PgTables {
        PgTables {
            documents: TableName::new("kb", "documents").unwrap(),
            agent_links: TableName::new("kb", "agent_kb").unwrap(),
            queue: TableName::new("kb", "embed_queue").unwrap(),
        }
    }

    #[test]
    fn search_is_agent_scoped_and_dimension_matched() {
        let sql = search_sql(&tables());
        assert!(sql.contains("FROM \"kb\".\"documents\" d"));
        assert!(sql.contains(
            "JOIN \"kb\".\"agent_kb\" l ON l.knowledge_base_id = d.knowledge_base_id"
        ));
        assert!(sql.contains("WHERE l.agent_id = $2"));
        assert!(sql.contains("AND vector_dims(d.embedding) = $5"));
        assert!(sql.contains("AND 1 - (d.embedding <=> $1) > $3"));
        assert!(sql.contains("ORDER BY d.embedding <=> $1 ASC"));
        assert!(sql.ends_with("LIMIT $4"));
    }

    #[test]
    fn document_lookup_reads_every_record_column() {
        let sql = document_sql(&tables());
        for column in [
            "knowledge_base_id",
            "source_id",
            "parent_id",
            "chunk_index",
            "dialogue_examples",
            "error_message",
        ] {
            assert!(sql.contains(column), "missing {column}");
        }
        assert!(sql.ends_with("FROM \"kb\".\"documents\" WHERE id = $1"));
    }

    #[test]
    fn sibling_upsert_replaces_on_id_conflict() {
        let sql = sibling_upsert_sql(&tables());
        assert!(sql.starts_with("INSERT INTO \"kb\".\"documents\""));
        assert!(sql.contains("$14, 'completed', NULL)"));
        assert!(sql.contains("ON CONFLICT (id) DO UPDATE SET"));
        assert!(sql.contains("embedding = EXCLUDED.embedding"));
        assert!(sql.contains("error_message = NULL"));
    }

    #[test]
    fn claim_takes_pending_and_stale_rows_under_lock() {
        let sql = claim_sql(&tables());
        assert!(sql.contains("UPDATE \"kb\".\"embed_queue\" SET status = 'processing'"));
        assert!(sql.contains("WHERE status = 'pending'"));
        assert!(sql.contains("updated_at < now() - make_interval(secs => $2)"));
        assert!(sql.contains("LIMIT $1"));
        assert!(sql.contains("FOR UPDATE SKIP LOCKED"));
        assert!(sql.ends_with("ORDER BY created_at ASC"));
    }
}
