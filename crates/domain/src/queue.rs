//! Queue items and the jobs they carry.
//!
//! Each queue carries exactly one payload kind, modeled as a sealed variant
//! so handlers validate statically instead of poking at untyped maps. The
//! item wrapper accumulates failure metadata across the item's whole
//! lifetime, including trips through the dead-letter queue.

use argus_shared::ids::{BatchId, CameraId, DetectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A detection request produced by the ingest layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionJob {
    pub camera_id: CameraId,
    /// Reference to the captured image (path or object-store key).
    pub image_ref: String,
    pub captured_at: DateTime<Utc>,
    /// Stamped when the image entered the pipeline, for end-to-end latency.
    pub pipeline_start_time: Option<DateTime<Utc>>,
}

/// A closed batch handed to the analysis stage.
///
/// This is the wire contract between the aggregator and the analysis queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub batch_id: BatchId,
    pub camera_id: CameraId,
    pub detection_ids: Vec<DetectionId>,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub close_reason: crate::batch::CloseReason,
    pub pipeline_start_time: Option<DateTime<Utc>>,
}

/// Payload of one queue item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "job", rename_all = "snake_case")]
pub enum JobPayload {
    Detection(DetectionJob),
    Analysis(AnalysisJob),
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Detection(_) => "detection",
            JobPayload::Analysis(_) => "analysis",
        }
    }
}

/// One unit of work in a queue or dead-letter queue.
///
/// `attempt_count` is cumulative across the item's whole lifetime: a requeue
/// from the DLQ resets nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub payload: JobPayload,
    pub attempt_count: u32,
    pub first_failed_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl QueueItem {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempt_count: 0,
            first_failed_at: None,
            last_failed_at: None,
            error: None,
        }
    }

    /// Record the outcome of a failed processing cycle.
    ///
    /// `attempts` is how many handler invocations the cycle consumed (one
    /// initial call plus retries).
    pub fn record_failure(&mut self, attempts: u32, error: impl Into<String>) {
        let now = Utc::now();
        self.attempt_count += attempts;
        self.first_failed_at.get_or_insert(now);
        self.last_failed_at = Some(now);
        self.error = Some(error.into());
    }
}
