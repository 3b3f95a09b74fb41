//! Object detections.

use argus_shared::ids::{CameraId, DetectionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel-space bounding box as returned by the detection service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One detection as returned by the detection service, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetection {
    pub object_type: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
}

/// A persisted detection, id assigned by the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: DetectionId,
    pub camera_id: CameraId,
    pub object_type: String,
    pub confidence: f32,
    pub bounding_box: BoundingBox,
    pub detected_at: DateTime<Utc>,
}
