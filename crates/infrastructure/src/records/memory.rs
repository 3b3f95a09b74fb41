//! In-memory record store.
//!
//! Assigns monotonically increasing detection ids the way the relational
//! adapter's sequence would. Retention is process lifetime; the durable SQL
//! adapter slots in behind the same port.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use argus_application::ports::RecordStore;
use argus_domain::{Detection, PipelineError, RawDetection, SecurityEvent};
use argus_shared::ids::{CameraId, DetectionId, EventId};

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    next_detection_id: AtomicI64,
    detections: DashMap<i64, Detection>,
    events: DashMap<Uuid, SecurityEvent>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        let mut events: Vec<_> = self.events.iter().map(|e| e.value().clone()).collect();
        events.sort_by_key(|e| e.created_at);
        events
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_detection(
        &self,
        camera_id: &CameraId,
        raw: &RawDetection,
        detected_at: DateTime<Utc>,
    ) -> Result<DetectionId, PipelineError> {
        let id = self.next_detection_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.detections.insert(
            id,
            Detection {
                id: DetectionId(id),
                camera_id: camera_id.clone(),
                object_type: raw.object_type.clone(),
                confidence: raw.confidence,
                bounding_box: raw.bounding_box,
                detected_at,
            },
        );
        Ok(DetectionId(id))
    }

    async fn detections_by_ids(
        &self,
        ids: &[DetectionId],
    ) -> Result<Vec<Detection>, PipelineError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.detections.get(&id.0).map(|d| d.value().clone()))
            .collect())
    }

    async fn insert_event(&self, event: &SecurityEvent) -> Result<(), PipelineError> {
        self.events.insert(event.id.0, event.clone());
        Ok(())
    }

    async fn event_by_id(&self, id: &EventId) -> Result<Option<SecurityEvent>, PipelineError> {
        Ok(self.events.get(&id.0).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_domain::BoundingBox;

    fn raw() -> RawDetection {
        RawDetection {
            object_type: "person".to_string(),
            confidence: 0.93,
            bounding_box: BoundingBox {
                x1: 0.0,
                y1: 0.0,
                x2: 100.0,
                y2: 200.0,
            },
        }
    }

    #[tokio::test]
    async fn detection_ids_increase_and_resolve() {
        let store = MemoryRecordStore::new();
        let camera = CameraId::new("front_door");
        let a = store
            .insert_detection(&camera, &raw(), Utc::now())
            .await
            .unwrap();
        let b = store
            .insert_detection(&camera, &raw(), Utc::now())
            .await
            .unwrap();
        assert!(b > a);

        let found = store.detections_by_ids(&[a, b]).await.unwrap();
        assert_eq!(found.len(), 2);

        // Unknown ids are skipped, not errors.
        let partial = store
            .detections_by_ids(&[a, DetectionId(9_999)])
            .await
            .unwrap();
        assert_eq!(partial.len(), 1);
    }
}
