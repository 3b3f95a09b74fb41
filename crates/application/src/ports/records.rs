//! Durable record store port.
//!
//! Plain insert/query for persisted detections and events. The pipeline
//! inserts detections as they arrive and exactly one event per successfully
//! analyzed batch.

use async_trait::async_trait;

use argus_domain::{Detection, PipelineError, RawDetection, SecurityEvent};
use argus_shared::ids::{CameraId, DetectionId, EventId};
use chrono::{DateTime, Utc};

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist one detection, assigning its id.
    async fn insert_detection(
        &self,
        camera_id: &CameraId,
        raw: &RawDetection,
        detected_at: DateTime<Utc>,
    ) -> Result<DetectionId, PipelineError>;

    /// Detections by id, in the order requested. Ids that no longer exist
    /// are skipped, not errors: a batch may outlive retention.
    async fn detections_by_ids(
        &self,
        ids: &[DetectionId],
    ) -> Result<Vec<Detection>, PipelineError>;

    async fn insert_event(&self, event: &SecurityEvent) -> Result<(), PipelineError>;

    async fn event_by_id(&self, id: &EventId) -> Result<Option<SecurityEvent>, PipelineError>;
}
