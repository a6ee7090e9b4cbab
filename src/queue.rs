//! Bounded, sequential draining of the re-embedding backlog.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::embedder::Embedder;
use crate::error::Result;
use crate::store::{ProcessingStatus, WorkItem, WorkQueue};

/// Final state of one drained item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    /// Queue item id.
    pub id: String,
    /// `completed` or `failed`.
    pub status: ProcessingStatus,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one drain invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Items pulled from the queue.
    pub dequeued: usize,
    /// Items embedded, stored and recorded as completed.
    pub completed: usize,
    /// Items that failed, including those whose final status could not be recorded.
    pub failed: usize,
    /// Per-item results in processing order.
    pub items: Vec<ItemOutcome>,
}

/// Pulls pending items and embeds them one at a time with the incremental profile.
#[derive(Clone)]
pub struct QueueWorker {
    embedder: Arc<dyn Embedder>,
    queue: Arc<dyn WorkQueue>,
    config: IngestConfig,
}

impl QueueWorker {
    /// Wires the worker to its collaborators.
    pub fn new(embedder: Arc<dyn Embedder>, queue: Arc<dyn WorkQueue>, config: IngestConfig) -> Self {
        Self {
            embedder,
            queue,
            config,
        }
    }

    /// Batch size actually used for a requested `limit`.
    pub fn batch_size(&self, limit: Option<usize>) -> usize {
        let ceiling = self.config.max_drain_batch.max(1);
        limit.unwrap_or(ceiling).clamp(1, ceiling)
    }

    /// Drains up to `limit` items (clamped to the configured ceiling).
    ///
    /// Only the dequeue itself can fail the call; per-item failures are recorded on the
    /// item and the batch continues. An item whose final status cannot be written stays
    /// claimed and is handed out again once `claim_timeout` passes.
    pub async fn drain(&self, limit: Option<usize>) -> Result<DrainReport> {
        let items = self
            .queue
            .dequeue(self.batch_size(limit), self.config.claim_timeout)
            .await?;
        let mut report = DrainReport {
            dequeued: items.len(),
            ..DrainReport::default()
        };

        for (position, item) in items.iter().enumerate() {
            if position > 0 && !self.config.inter_call_delay.is_zero() {
                tokio::time::sleep(self.config.inter_call_delay).await;
            }
            let outcome = match self.embed_item(item).await {
                Ok(()) => self.finish(item, ProcessingStatus::Completed, None).await,
                Err(err) => {
                    warn!(item = %item.id, error = %err, "work item failed");
                    self.finish(item, ProcessingStatus::Failed, Some(err.to_string()))
                        .await
                }
            };
            if outcome.status == ProcessingStatus::Completed {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
            report.items.push(outcome);
        }

        info!(
            dequeued = report.dequeued,
            completed = report.completed,
            failed = report.failed,
            "queue drained"
        );
        Ok(report)
    }

    async fn embed_item(&self, item: &WorkItem) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&item.content, &self.config.incremental_profile)
            .await?;
        self.queue.store_embedding(item, &embedding).await?;
        debug!(item = %item.id, document = %item.document_id, "stored backlog embedding");
        Ok(())
    }

    async fn finish(
        &self,
        item: &WorkItem,
        status: ProcessingStatus,
        error: Option<String>,
    ) -> ItemOutcome {
        match self
            .queue
            .mark_status(&item.id, status, error.as_deref())
            .await
        {
            Ok(()) => ItemOutcome {
                id: item.id.clone(),
                status,
                error,
            },
            Err(err) => {
                warn!(item = %item.id, error = %err, %status, "could not record work item status");
                ItemOutcome {
                    id: item.id.clone(),
                    status: ProcessingStatus::Failed,
                    error: Some(format!("could not record {status} status: {err}")),
                }
            }
        }
    }
}
