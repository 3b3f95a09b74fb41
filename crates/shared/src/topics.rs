//! Centralized channel, queue and store-key naming.
//!
//! Single source of truth for every name shared between producers and
//! consumers, preventing mismatches between the aggregator, the queue
//! workers and the broadcaster.

/// Pub/sub channel carrying every live-client notification.
pub const EVENTS_CHANNEL: &str = "argus.events";

/// Queue fed by the ingest layer with detection jobs.
pub const DETECTION_QUEUE: &str = "queue:detection";

/// Queue fed by the batch aggregator with closed batches.
pub const ANALYSIS_QUEUE: &str = "queue:analysis";

/// Prefix turning a queue name into its dead-letter counterpart.
pub const DLQ_PREFIX: &str = "dlq:";

/// Notification types delivered through the broadcaster.
pub mod notifications {
    /// A detection was appended to an open batch.
    pub const DETECTION_NEW: &str = "detection.new";
    /// A batch was closed and handed to the analysis queue.
    pub const DETECTION_BATCH: &str = "detection.batch";
    /// A security event was persisted after analysis.
    pub const SECURITY_EVENT_NEW: &str = "security_event.new";
}

/// Dead-letter queue name for a source queue.
pub fn dlq_for(queue: &str) -> String {
    format!("{DLQ_PREFIX}{queue}")
}

/// Store keys holding per-batch state. All of them carry a TTL so a crash
/// mid-batch self-heals once the keys expire.
pub mod batch_keys {
    /// Maps a camera to its single open batch id.
    pub fn active(camera_id: &str) -> String {
        format!("batch:active:{camera_id}")
    }

    /// Prefix for scanning every open batch.
    pub const ACTIVE_PREFIX: &str = "batch:active:";

    /// Batch metadata (camera, started_at, last_activity_at).
    pub fn meta(batch_id: &str) -> String {
        format!("batch:{batch_id}:meta")
    }

    /// Ordered list of detection ids appended to the batch.
    pub fn detections(batch_id: &str) -> String {
        format!("batch:{batch_id}:detections")
    }

    /// Short-lived marker guarding against two close attempts racing.
    pub fn closing(batch_id: &str) -> String {
        format!("batch:closing:{batch_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlq_names_derive_from_queue_names() {
        assert_eq!(dlq_for(DETECTION_QUEUE), "dlq:queue:detection");
        assert_eq!(dlq_for(ANALYSIS_QUEUE), "dlq:queue:analysis");
    }

    #[test]
    fn batch_keys_share_the_scan_prefix() {
        assert!(batch_keys::active("cam-1").starts_with(batch_keys::ACTIVE_PREFIX));
    }
}
