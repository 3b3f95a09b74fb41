//! Batch aggregator behavior: windows, idle closes, size closes,
//! per-camera independence and close idempotence.

use std::sync::Arc;
use std::time::Duration;

use argus_application::batching::BatchAggregator;
use argus_application::broadcast::EventBroadcaster;
use argus_application::metrics::PipelineMetrics;
use argus_application::ports::SharedStore;
use argus_domain::{CloseReason, JobPayload, QueueItem};
use argus_infrastructure::MemoryStore;
use argus_shared::config::{BatchingConfig, BroadcastConfig};
use argus_shared::ids::{CameraId, DetectionId};
use argus_shared::topics::{self, batch_keys};

fn batching(window_secs: u64, idle_secs: u64, max_detections: usize) -> BatchingConfig {
    BatchingConfig {
        window_secs,
        idle_timeout_secs: idle_secs,
        max_detections,
        state_ttl_secs: 3_600,
        closing_ttl_secs: 300,
        sweep_interval_secs: 1,
    }
}

fn build(config: BatchingConfig) -> (Arc<MemoryStore>, Arc<BatchAggregator>) {
    let store = Arc::new(MemoryStore::new());
    let metrics = PipelineMetrics::new();
    let broadcaster = Arc::new(EventBroadcaster::new(
        store.clone(),
        BroadcastConfig::default(),
        metrics.clone(),
    ));
    let aggregator = Arc::new(BatchAggregator::new(
        store.clone(),
        broadcaster,
        config,
        metrics,
    ));
    (store, aggregator)
}

async fn pop_analysis_job(store: &MemoryStore) -> Option<QueueItem> {
    store
        .queue_pop(topics::ANALYSIS_QUEUE, Duration::ZERO)
        .await
        .unwrap()
        .map(|raw| serde_json::from_str(&raw).unwrap())
}

#[tokio::test]
async fn quiet_camera_closes_on_the_idle_timeout() {
    let (store, aggregator) = build(batching(3, 1, 100));
    let camera = CameraId::new("front_door");

    aggregator
        .add_detection(&camera, DetectionId(1))
        .await
        .unwrap();
    assert_eq!(aggregator.check_timeouts().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(aggregator.check_timeouts().await.unwrap(), 1);

    let item = pop_analysis_job(&store).await.expect("batch on queue");
    let JobPayload::Analysis(job) = item.payload else {
        panic!("expected an analysis job");
    };
    assert_eq!(job.camera_id, camera);
    assert_eq!(job.detection_ids, vec![DetectionId(1)]);
    assert_eq!(job.close_reason, CloseReason::IdleTimeout);

    // All batch-scoped state is gone the instant the batch closes.
    assert!(store
        .scan_prefix(batch_keys::ACTIVE_PREFIX)
        .await
        .unwrap()
        .is_empty());

    // A second sweep has nothing left to close.
    assert_eq!(aggregator.check_timeouts().await.unwrap(), 0);
    assert!(pop_analysis_job(&store).await.is_none());
}

#[tokio::test]
async fn steady_camera_closes_on_the_window_despite_activity() {
    let (store, aggregator) = build(batching(1, 1, 100));
    let camera = CameraId::new("driveway");

    // Detections keep arriving faster than the idle timeout.
    for id in 1..=4 {
        aggregator
            .add_detection(&camera, DetectionId(id))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    assert_eq!(aggregator.check_timeouts().await.unwrap(), 1);
    let item = pop_analysis_job(&store).await.expect("batch on queue");
    let JobPayload::Analysis(job) = item.payload else {
        panic!("expected an analysis job");
    };
    assert_eq!(job.close_reason, CloseReason::WindowTimeout);
    assert_eq!(
        job.detection_ids,
        (1..=4).map(DetectionId).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn reaching_the_size_limit_closes_immediately() {
    let (store, aggregator) = build(batching(90, 30, 3));
    let camera = CameraId::new("lobby");

    for id in 1..=3 {
        aggregator
            .add_detection(&camera, DetectionId(id))
            .await
            .unwrap();
    }

    let item = pop_analysis_job(&store).await.expect("batch on queue");
    let JobPayload::Analysis(job) = item.payload else {
        panic!("expected an analysis job");
    };
    assert_eq!(job.close_reason, CloseReason::MaxDetections);
    assert_eq!(job.detection_ids.len(), 3);

    // The next detection opens a fresh batch.
    aggregator
        .add_detection(&camera, DetectionId(4))
        .await
        .unwrap();
    let active = store
        .scan_prefix(batch_keys::ACTIVE_PREFIX)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    let new_batch = store.get(&active[0]).await.unwrap().unwrap();
    assert_ne!(new_batch, job.batch_id.as_str());
}

#[tokio::test]
async fn cameras_batch_independently_and_concurrently() {
    let (store, aggregator) = build(batching(90, 30, 1_000));

    let mut tasks = Vec::new();
    for camera_name in ["cam-a", "cam-b"] {
        let aggregator = aggregator.clone();
        tasks.push(tokio::spawn(async move {
            let camera = CameraId::new(camera_name);
            for id in 1..=50 {
                aggregator
                    .add_detection(&camera, DetectionId(id))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let active = store
        .scan_prefix(batch_keys::ACTIVE_PREFIX)
        .await
        .unwrap();
    assert_eq!(active.len(), 2);

    for key in &active {
        let batch_id = store.get(key).await.unwrap().unwrap();
        let count = store
            .list_len(&batch_keys::detections(&batch_id))
            .await
            .unwrap();
        assert_eq!(count, 50);
    }

    // Flushing one camera leaves the other's batch open.
    assert!(aggregator
        .flush_camera(&CameraId::new("cam-a"))
        .await
        .unwrap());
    let remaining = store
        .scan_prefix(batch_keys::ACTIVE_PREFIX)
        .await
        .unwrap();
    assert_eq!(remaining, vec![batch_keys::active("cam-b")]);

    let item = pop_analysis_job(&store).await.expect("flushed batch");
    let JobPayload::Analysis(job) = item.payload else {
        panic!("expected an analysis job");
    };
    assert_eq!(job.close_reason, CloseReason::ManualFlush);
}

#[tokio::test]
async fn racing_closers_deliver_the_batch_exactly_once() {
    let (store, aggregator) = build(batching(90, 30, 100));
    let camera = CameraId::new("garage");
    aggregator
        .add_detection(&camera, DetectionId(1))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        aggregator.flush_camera(&camera),
        aggregator.flush_camera(&camera)
    );
    let closes = [first.unwrap(), second.unwrap()];
    assert_eq!(closes.iter().filter(|closed| **closed).count(), 1);

    assert!(pop_analysis_job(&store).await.is_some());
    assert!(pop_analysis_job(&store).await.is_none());
}
