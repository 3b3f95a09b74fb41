//! Model service ports.
//!
//! The detection and analysis models are external HTTP services; the core
//! sees them as opaque asynchronous calls that succeed, fail transiently or
//! fail permanently (per [`argus_domain::Classify`]). Timeouts live in the
//! adapter.

use async_trait::async_trait;

use argus_domain::{AnalysisRequest, DetectionJob, PipelineError, RawDetection, RiskAssessment};

/// `POST /detect` — image in, detections out.
#[async_trait]
pub trait DetectionClient: Send + Sync {
    async fn detect(&self, job: &DetectionJob) -> Result<Vec<RawDetection>, PipelineError>;
}

/// `POST /analyze` — batch context in, risk assessment out.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<RiskAssessment, PipelineError>;
}
