//! Domain model for the Argus pipeline.
//!
//! Pure types and judgments: queue items, batches, detections, security
//! events, worker lifecycle records and the transient/permanent error
//! taxonomy every resilience primitive keys off.

pub mod batch;
pub mod detection;
pub mod error;
pub mod event;
pub mod queue;
pub mod worker;

pub use batch::{BatchMeta, CloseReason};
pub use detection::{BoundingBox, Detection, RawDetection};
pub use error::{Classify, ErrorClass, PipelineError};
pub use event::{AnalysisRequest, RiskAssessment, RiskLevel, SecurityEvent};
pub use queue::{AnalysisJob, DetectionJob, JobPayload, QueueItem};
pub use worker::{RestartAttempt, RestartOutcome, WorkerRecord, WorkerStatus};
