//! Security events produced by the analysis stage.

use argus_shared::ids::{BatchId, CameraId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::Detection;

/// Risk level assigned by the analysis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Structured prompt payload sent to the analysis service for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub batch_id: BatchId,
    pub camera_id: CameraId,
    pub close_reason: crate::batch::CloseReason,
    pub window_started_at: DateTime<Utc>,
    pub window_closed_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

/// The analysis service's verdict for one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub reasoning: String,
}

/// A persisted security event, produced exactly once per analyzed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: EventId,
    pub camera_id: CameraId,
    pub batch_id: BatchId,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub summary: String,
    pub reasoning: String,
    pub detection_count: usize,
    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn from_assessment(
        camera_id: CameraId,
        batch_id: BatchId,
        assessment: RiskAssessment,
        detection_count: usize,
    ) -> Self {
        Self {
            id: EventId::new(),
            camera_id,
            batch_id,
            risk_score: assessment.risk_score,
            risk_level: assessment.risk_level,
            summary: assessment.summary,
            reasoning: assessment.reasoning,
            detection_count,
            created_at: Utc::now(),
        }
    }

    /// High-risk events need per-connection delivery acknowledgment.
    pub fn requires_ack(&self) -> bool {
        self.risk_score >= 80 || self.risk_level == RiskLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(score: u8, level: RiskLevel) -> SecurityEvent {
        SecurityEvent::from_assessment(
            CameraId::new("front_door"),
            BatchId::generate(),
            RiskAssessment {
                risk_score: score,
                risk_level: level,
                summary: "test".to_string(),
                reasoning: "test".to_string(),
            },
            1,
        )
    }

    #[test]
    fn high_score_requires_ack() {
        assert!(event(80, RiskLevel::Medium).requires_ack());
        assert!(!event(79, RiskLevel::High).requires_ack());
    }

    #[test]
    fn critical_level_requires_ack_regardless_of_score() {
        assert!(event(10, RiskLevel::Critical).requires_ack());
    }

    #[test]
    fn risk_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
    }
}
