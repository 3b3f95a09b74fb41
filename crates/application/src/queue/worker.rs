//! Generic queue worker.
//!
//! Pulls one item at a time from a named queue, runs the stage handler
//! through the shared retry policy and routes the outcome: success discards
//! the item, permanent failures are dropped with a log line, exhausted
//! transient failures go to the dead-letter queue with their full failure
//! metadata, and circuit-open rejections park the item back at the tail
//! without consuming any of its budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use argus_domain::{JobPayload, PipelineError, QueueItem};
use argus_shared::topics;

use crate::metrics::PipelineMetrics;
use crate::ports::SharedStore;
use crate::resilience::{FailureKind, RetryPolicy};

/// Stage-specific processing for one queue's payload kind.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name for logs, e.g. `detection`.
    fn name(&self) -> &'static str;

    async fn handle(&self, payload: &JobPayload) -> Result<(), PipelineError>;
}

pub struct QueueWorker {
    queue: String,
    store: Arc<dyn SharedStore>,
    handler: Arc<dyn JobHandler>,
    retry: RetryPolicy,
    pop_timeout: Duration,
    metrics: PipelineMetrics,
}

impl QueueWorker {
    pub fn new(
        queue: impl Into<String>,
        store: Arc<dyn SharedStore>,
        handler: Arc<dyn JobHandler>,
        retry: RetryPolicy,
        pop_timeout: Duration,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            queue: queue.into(),
            store,
            handler,
            retry,
            pop_timeout,
            metrics,
        }
    }

    /// Pull-process loop. Returns when the shutdown signal fires; any error
    /// escaping this function is a worker crash the supervisor handles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        info!(queue = %self.queue, handler = self.handler.name(), "queue worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = tokio::select! {
                result = self.store.queue_pop(&self.queue, self.pop_timeout) => {
                    match result {
                        Ok(popped) => popped,
                        Err(e) => {
                            // Stage-local: a store hiccup must not kill the
                            // loop. Pause instead of spinning.
                            error!(queue = %self.queue, error = %e, "queue pop failed");
                            tokio::time::sleep(self.pop_timeout).await;
                            continue;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the owner is gone: stop too.
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if let Some(raw) = popped {
                self.process(raw).await;
            }
        }
        info!(queue = %self.queue, "queue worker stopped");
        Ok(())
    }

    async fn process(&self, raw: String) {
        let mut item: QueueItem = match serde_json::from_str(&raw) {
            Ok(item) => item,
            Err(e) => {
                error!(queue = %self.queue, error = %e, "dropping undecodable queue item");
                self.metrics.job_failed(&self.queue, "undecodable");
                return;
            }
        };

        let outcome = self
            .retry
            .execute(|_attempt| {
                let handler = self.handler.clone();
                let payload = item.payload.clone();
                async move { handler.handle(&payload).await }
            })
            .await;

        match outcome {
            Ok(()) => {
                debug!(queue = %self.queue, item = %item.id, "item processed");
                self.metrics.job_processed(&self.queue);
            }
            Err(failure) => match failure.kind {
                FailureKind::Permanent => {
                    // Never retried, never dead-lettered: the work itself is
                    // malformed and reprocessing cannot fix it.
                    warn!(
                        queue = %self.queue,
                        item = %item.id,
                        error = %failure.error,
                        "permanent failure, dropping item"
                    );
                    self.metrics.job_failed(&self.queue, "permanent");
                }
                FailureKind::CircuitOpen => {
                    // Dependency is known-bad right now. Park the item at
                    // the tail untouched and let the breaker recover.
                    debug!(
                        queue = %self.queue,
                        item = %item.id,
                        "circuit open, parking item"
                    );
                    self.metrics.job_failed(&self.queue, "circuit_open");
                    if let Err(e) = self.store.queue_push(&self.queue, &raw).await {
                        error!(queue = %self.queue, error = %e, "failed to park item");
                    }
                    tokio::time::sleep(self.pop_timeout).await;
                }
                FailureKind::Exhausted => {
                    item.record_failure(failure.attempts, failure.error.to_string());
                    self.dead_letter(&item).await;
                }
            },
        }
    }

    async fn dead_letter(&self, item: &QueueItem) {
        let dlq = topics::dlq_for(&self.queue);
        warn!(
            queue = %self.queue,
            item = %item.id,
            attempts = item.attempt_count,
            error = item.error.as_deref().unwrap_or(""),
            "retries exhausted, moving item to dead-letter queue"
        );
        match serde_json::to_string(item) {
            Ok(encoded) => {
                if let Err(e) = self.store.queue_push(&dlq, &encoded).await {
                    error!(dlq = %dlq, error = %e, "failed to dead-letter item");
                } else {
                    self.metrics.job_dead_lettered(&self.queue);
                }
            }
            Err(e) => error!(item = %item.id, error = %e, "failed to encode dead-lettered item"),
        }
    }
}
