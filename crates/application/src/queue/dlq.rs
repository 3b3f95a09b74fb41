//! Dead-letter queue operator surface.
//!
//! Exhausted items keep their original payload plus the accumulated failure
//! metadata, so an operator can see what is stuck, why and for how long —
//! and push it back into the source queue once the cause is fixed. Requeue
//! and clear are privileged operations; the interface layer enforces that.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use argus_domain::{PipelineError, QueueItem};
use argus_shared::topics;

use crate::metrics::PipelineMetrics;
use crate::ports::SharedStore;

/// Default bound for [`DeadLetterService::requeue_all`].
pub const REQUEUE_ALL_LIMIT: usize = 1_000;

#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    pub queue: String,
    pub dlq: String,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct DlqPage {
    pub queue: String,
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub items: Vec<QueueItem>,
}

pub struct DeadLetterService {
    store: Arc<dyn SharedStore>,
    metrics: PipelineMetrics,
}

impl DeadLetterService {
    pub fn new(store: Arc<dyn SharedStore>, metrics: PipelineMetrics) -> Self {
        Self { store, metrics }
    }

    /// Item counts for the dead-letter queues of `queues`.
    pub async fn stats(&self, queues: &[&str]) -> Result<Vec<DlqStats>, PipelineError> {
        let mut stats = Vec::with_capacity(queues.len());
        for queue in queues {
            let dlq = topics::dlq_for(queue);
            let count = self.store.queue_len(&dlq).await?;
            stats.push(DlqStats {
                queue: queue.to_string(),
                dlq,
                count,
            });
        }
        Ok(stats)
    }

    /// Paginated listing, oldest first. Page numbering starts at 0.
    pub async fn list(
        &self,
        queue: &str,
        page: usize,
        page_size: usize,
    ) -> Result<DlqPage, PipelineError> {
        let dlq = topics::dlq_for(queue);
        let total = self.store.queue_len(&dlq).await?;
        let raw_items = self
            .store
            .queue_range(&dlq, page.saturating_mul(page_size), page_size)
            .await?;

        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            match serde_json::from_str::<QueueItem>(&raw) {
                Ok(item) => items.push(item),
                Err(e) => warn!(dlq = %dlq, error = %e, "skipping undecodable DLQ item"),
            }
        }

        Ok(DlqPage {
            queue: queue.to_string(),
            page,
            page_size,
            total,
            items,
        })
    }

    /// Pop the oldest dead-lettered item and push it back onto its source
    /// queue. Nothing is reset: the attempt count stays cumulative across
    /// the item's whole lifetime.
    pub async fn requeue_one(&self, queue: &str) -> Result<Option<QueueItem>, PipelineError> {
        let dlq = topics::dlq_for(queue);
        let Some(raw) = self.store.queue_pop(&dlq, Duration::ZERO).await? else {
            return Ok(None);
        };

        self.store.queue_push(queue, &raw).await?;
        self.metrics.job_requeued(queue);

        let item = serde_json::from_str::<QueueItem>(&raw)
            .map_err(|e| PipelineError::Serialization(e.to_string()))?;
        info!(queue = %queue, item = %item.id, attempts = item.attempt_count, "item requeued from DLQ");
        Ok(Some(item))
    }

    /// Requeue up to `limit` items (bounded per call so a huge DLQ cannot
    /// flood the source queue in one operation). Returns how many moved.
    pub async fn requeue_all(&self, queue: &str, limit: usize) -> Result<usize, PipelineError> {
        let limit = limit.min(REQUEUE_ALL_LIMIT);
        let mut moved = 0;
        while moved < limit {
            if self.requeue_one(queue).await?.is_none() {
                break;
            }
            moved += 1;
        }
        info!(queue = %queue, moved, "bulk requeue finished");
        Ok(moved)
    }

    /// Destructively drop every dead-lettered item for `queue`.
    pub async fn clear(&self, queue: &str) -> Result<usize, PipelineError> {
        let dlq = topics::dlq_for(queue);
        let removed = self.store.queue_clear(&dlq).await?;
        warn!(dlq = %dlq, removed, "dead-letter queue cleared");
        Ok(removed)
    }
}
