//! Analysis stage: closed batch in, persisted security event out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use argus_domain::{AnalysisRequest, JobPayload, PipelineError, SecurityEvent};
use argus_shared::topics;

use crate::broadcast::EventBroadcaster;
use crate::ports::{AnalysisClient, RecordStore};
use crate::queue::JobHandler;
use crate::resilience::CircuitBreaker;

pub struct AnalysisJobHandler {
    client: Arc<dyn AnalysisClient>,
    records: Arc<dyn RecordStore>,
    broadcaster: Arc<EventBroadcaster>,
    breaker: Arc<CircuitBreaker>,
    inference: Arc<Semaphore>,
}

impl AnalysisJobHandler {
    pub fn new(
        client: Arc<dyn AnalysisClient>,
        records: Arc<dyn RecordStore>,
        broadcaster: Arc<EventBroadcaster>,
        breaker: Arc<CircuitBreaker>,
        inference: Arc<Semaphore>,
    ) -> Self {
        Self {
            client,
            records,
            broadcaster,
            breaker,
            inference,
        }
    }
}

#[async_trait]
impl JobHandler for AnalysisJobHandler {
    fn name(&self) -> &'static str {
        "analysis"
    }

    async fn handle(&self, payload: &JobPayload) -> Result<(), PipelineError> {
        let JobPayload::Analysis(job) = payload else {
            return Err(PipelineError::UnexpectedPayload {
                queue: topics::ANALYSIS_QUEUE.to_string(),
                expected: "analysis".to_string(),
            });
        };

        let detections = self.records.detections_by_ids(&job.detection_ids).await?;
        let detection_count = detections.len();
        let request = AnalysisRequest {
            batch_id: job.batch_id.clone(),
            camera_id: job.camera_id.clone(),
            close_reason: job.close_reason,
            window_started_at: job.started_at,
            window_closed_at: job.closed_at,
            detections,
        };

        let assessment = {
            let _permit = self.inference.acquire().await.map_err(|_| {
                PipelineError::Worker {
                    worker: "analysis".to_string(),
                    message: "inference semaphore closed".to_string(),
                }
            })?;
            self.breaker
                .call(self.client.analyze(&request))
                .await
                .map_err(PipelineError::from)?
        };

        let event = SecurityEvent::from_assessment(
            job.camera_id.clone(),
            job.batch_id.clone(),
            assessment,
            detection_count,
        );
        self.records.insert_event(&event).await?;

        // The event is durable at this point. A lost broadcast (already
        // retried inside publish) must not fail the job, or a retry would
        // insert the event twice.
        if let Err(e) = self.broadcaster.publish_event(&event).await {
            warn!(event_id = %event.id, error = %e, "event persisted but broadcast lost");
        }

        info!(
            camera_id = %event.camera_id,
            batch_id = %event.batch_id,
            risk_score = event.risk_score,
            risk_level = %event.risk_level,
            detection_count,
            "security event created"
        );
        Ok(())
    }
}
