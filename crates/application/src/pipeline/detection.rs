//! Detection stage: image in, batched detections out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use argus_domain::{JobPayload, PipelineError};
use argus_shared::topics;

use crate::batching::BatchAggregator;
use crate::ports::{DetectionClient, RecordStore};
use crate::queue::JobHandler;
use crate::resilience::CircuitBreaker;

pub struct DetectionJobHandler {
    client: Arc<dyn DetectionClient>,
    records: Arc<dyn RecordStore>,
    aggregator: Arc<BatchAggregator>,
    breaker: Arc<CircuitBreaker>,
    inference: Arc<Semaphore>,
}

impl DetectionJobHandler {
    pub fn new(
        client: Arc<dyn DetectionClient>,
        records: Arc<dyn RecordStore>,
        aggregator: Arc<BatchAggregator>,
        breaker: Arc<CircuitBreaker>,
        inference: Arc<Semaphore>,
    ) -> Self {
        Self {
            client,
            records,
            aggregator,
            breaker,
            inference,
        }
    }
}

#[async_trait]
impl JobHandler for DetectionJobHandler {
    fn name(&self) -> &'static str {
        "detection"
    }

    async fn handle(&self, payload: &JobPayload) -> Result<(), PipelineError> {
        let JobPayload::Detection(job) = payload else {
            return Err(PipelineError::UnexpectedPayload {
                queue: topics::DETECTION_QUEUE.to_string(),
                expected: "detection".to_string(),
            });
        };

        let detections = {
            let _permit = self.inference.acquire().await.map_err(|_| {
                PipelineError::Worker {
                    worker: "detection".to_string(),
                    message: "inference semaphore closed".to_string(),
                }
            })?;
            self.breaker
                .call(self.client.detect(job))
                .await
                .map_err(PipelineError::from)?
        };

        if detections.is_empty() {
            debug!(camera_id = %job.camera_id, "no detections in frame");
            return Ok(());
        }

        for raw in &detections {
            let detection_id = self
                .records
                .insert_detection(&job.camera_id, raw, job.captured_at)
                .await?;
            self.aggregator
                .add_detection(&job.camera_id, detection_id)
                .await?;
        }

        debug!(
            camera_id = %job.camera_id,
            detections = detections.len(),
            "detection job processed"
        );
        Ok(())
    }
}
