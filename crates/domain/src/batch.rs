//! Batch state as stored in the shared store.

use argus_shared::ids::{BatchId, CameraId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a batch was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// `batch_window_seconds` elapsed since the batch opened.
    WindowTimeout,
    /// `batch_idle_timeout_seconds` elapsed since the last detection.
    IdleTimeout,
    /// The detection list reached `batch_max_detections`.
    MaxDetections,
    /// An operator flushed the camera explicitly.
    ManualFlush,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloseReason::WindowTimeout => "window_timeout",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::MaxDetections => "max_detections",
            CloseReason::ManualFlush => "manual_flush",
        };
        write!(f, "{s}")
    }
}

/// Metadata of one open batch, stored under `batch:{id}:meta`.
///
/// The detection list lives in its own store key so appends stay atomic
/// under concurrent writers across process instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMeta {
    pub batch_id: BatchId,
    pub camera_id: CameraId,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl BatchMeta {
    pub fn open(batch_id: BatchId, camera_id: CameraId, now: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            camera_id,
            started_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    /// The close reason this batch is due for at `now`, if any.
    ///
    /// The window deadline is judged first: a batch that outlived both
    /// deadlines closes for the window, which started earlier.
    pub fn due_close_reason(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        idle: chrono::Duration,
    ) -> Option<CloseReason> {
        if now - self.started_at >= window {
            Some(CloseReason::WindowTimeout)
        } else if now - self.last_activity_at >= idle {
            Some(CloseReason::IdleTimeout)
        } else {
            None
        }
    }
}
