//! Batch aggregator.
//!
//! Groups detections into one open batch per camera, authoritatively in the
//! shared store so any worker instance can resume after a crash. In-process
//! state is limited to locks: a per-camera mutex (unrelated cameras never
//! serialize against each other) and close/sweep mutexes serializing the
//! rarer close path. Every batch-scoped key carries a TTL, so state orphaned
//! by a crash expires instead of leaking.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use argus_domain::{AnalysisJob, BatchMeta, CloseReason, JobPayload, PipelineError, QueueItem};
use argus_shared::config::BatchingConfig;
use argus_shared::ids::{BatchId, CameraId, DetectionId};
use argus_shared::topics::{self, batch_keys, notifications};

use crate::broadcast::EventBroadcaster;
use crate::metrics::PipelineMetrics;
use crate::ports::SharedStore;

pub struct BatchAggregator {
    store: Arc<dyn SharedStore>,
    broadcaster: Arc<EventBroadcaster>,
    config: BatchingConfig,
    metrics: PipelineMetrics,
    /// Lock per camera. The map guards only lock *creation*; the per-camera
    /// critical section is the mutex inside.
    camera_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Serializes individual close operations across cameras.
    close_lock: Mutex<()>,
    /// Serializes whole timeout sweeps; two sweeps never interleave.
    sweep_lock: Mutex<()>,
}

impl BatchAggregator {
    pub fn new(
        store: Arc<dyn SharedStore>,
        broadcaster: Arc<EventBroadcaster>,
        config: BatchingConfig,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            store,
            broadcaster,
            config,
            metrics,
            camera_locks: DashMap::new(),
            close_lock: Mutex::new(()),
            sweep_lock: Mutex::new(()),
        }
    }

    fn camera_lock(&self, camera_id: &CameraId) -> Arc<Mutex<()>> {
        self.camera_locks
            .entry(camera_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append a detection to the camera's open batch, creating the batch if
    /// the camera is idle. Closes the batch in place once it reaches the
    /// size limit.
    pub async fn add_detection(
        &self,
        camera_id: &CameraId,
        detection_id: DetectionId,
    ) -> Result<(), PipelineError> {
        let lock = self.camera_lock(camera_id);
        let _camera_guard = lock.lock().await;

        let mut meta = self.open_or_create_batch(camera_id).await?;

        let detections_key = batch_keys::detections(meta.batch_id.as_str());
        let count = self
            .store
            .list_append(&detections_key, &detection_id.to_string())
            .await?;

        // Refresh activity and every TTL while the batch is alive.
        meta.touch(Utc::now());
        let ttl = self.config.state_ttl();
        self.store
            .set(
                &batch_keys::meta(meta.batch_id.as_str()),
                &serde_json::to_string(&meta).map_err(PipelineError::serialization)?,
                Some(ttl),
            )
            .await?;
        self.store.expire(&detections_key, ttl).await?;
        self.store
            .expire(&batch_keys::active(camera_id.as_str()), ttl)
            .await?;

        self.metrics.detection_batched();
        self.notify(
            notifications::DETECTION_NEW,
            json!({
                "camera_id": camera_id,
                "detection_id": detection_id,
                "batch_id": meta.batch_id,
                "batch_size": count,
            }),
        )
        .await;

        debug!(
            camera_id = %camera_id,
            batch_id = %meta.batch_id,
            batch_size = count,
            "detection added to batch"
        );

        if count >= self.config.max_detections {
            self.close_batch_locked(&meta, CloseReason::MaxDetections)
                .await?;
        }
        Ok(())
    }

    /// The camera's open batch, created atomically if absent. Caller holds
    /// the camera lock.
    async fn open_or_create_batch(&self, camera_id: &CameraId) -> Result<BatchMeta, PipelineError> {
        let active_key = batch_keys::active(camera_id.as_str());

        if let Some(batch_id) = self.store.get(&active_key).await? {
            let meta_key = batch_keys::meta(&batch_id);
            match self.store.get(&meta_key).await? {
                Some(raw) => {
                    return serde_json::from_str(&raw).map_err(PipelineError::serialization);
                }
                None => {
                    // Active pointer outlived its metadata (partial expiry).
                    // Rebuild rather than lose the batch id under it.
                    warn!(
                        camera_id = %camera_id,
                        batch_id = %batch_id,
                        "batch metadata missing, rebuilding"
                    );
                    let meta = BatchMeta::open(
                        BatchId::from(batch_id.as_str()),
                        camera_id.clone(),
                        Utc::now(),
                    );
                    self.store
                        .set(
                            &meta_key,
                            &serde_json::to_string(&meta).map_err(PipelineError::serialization)?,
                            Some(self.config.state_ttl()),
                        )
                        .await?;
                    return Ok(meta);
                }
            }
        }

        let batch_id = BatchId::generate();
        let meta = BatchMeta::open(batch_id.clone(), camera_id.clone(), Utc::now());
        let entries = [
            (active_key.clone(), batch_id.as_str().to_string()),
            (
                batch_keys::meta(batch_id.as_str()),
                serde_json::to_string(&meta).map_err(PipelineError::serialization)?,
            ),
        ];

        if self
            .store
            .set_nx_many(&entries, self.config.state_ttl())
            .await?
        {
            info!(camera_id = %camera_id, batch_id = %batch_id, "batch opened");
            return Ok(meta);
        }

        // Another instance created the batch between our read and write.
        let batch_id = self
            .store
            .get(&active_key)
            .await?
            .ok_or_else(|| PipelineError::Store("active batch vanished during create".into()))?;
        let raw = self
            .store
            .get(&batch_keys::meta(&batch_id))
            .await?
            .ok_or_else(|| PipelineError::Store("batch metadata vanished during create".into()))?;
        serde_json::from_str(&raw).map_err(PipelineError::serialization)
    }

    /// Close one batch. Caller holds the camera lock; the close lock is
    /// taken here, and the short-TTL closing marker makes racing closers
    /// (another instance, or a crash-recovered sweep) no-ops. Returns
    /// whether this call performed the close.
    async fn close_batch_locked(
        &self,
        meta: &BatchMeta,
        reason: CloseReason,
    ) -> Result<bool, PipelineError> {
        let _close_guard = self.close_lock.lock().await;

        let closing_key = batch_keys::closing(meta.batch_id.as_str());
        let now = Utc::now();
        if !self
            .store
            .set_nx(&closing_key, &now.to_rfc3339(), self.config.closing_ttl())
            .await?
        {
            debug!(batch_id = %meta.batch_id, "close already in progress, skipping");
            return Ok(false);
        }

        // The marker alone is not enough: verify the batch still exists so
        // a crash between marker and delete cannot double-deliver.
        let active_key = batch_keys::active(meta.camera_id.as_str());
        match self.store.get(&active_key).await? {
            Some(current) if current == meta.batch_id.as_str() => {}
            _ => {
                debug!(batch_id = %meta.batch_id, "batch already closed, skipping");
                return Ok(false);
            }
        }

        let detections_key = batch_keys::detections(meta.batch_id.as_str());
        let raw_ids = self.store.list_all(&detections_key).await?;
        let detection_ids: Vec<DetectionId> = raw_ids
            .iter()
            .filter_map(|raw| match raw.parse::<i64>() {
                Ok(id) => Some(DetectionId(id)),
                Err(_) => {
                    warn!(batch_id = %meta.batch_id, value = %raw, "skipping malformed detection id");
                    None
                }
            })
            .collect();

        let job = AnalysisJob {
            batch_id: meta.batch_id.clone(),
            camera_id: meta.camera_id.clone(),
            detection_ids,
            started_at: meta.started_at,
            closed_at: now,
            close_reason: reason,
            pipeline_start_time: None,
        };
        let detection_count = job.detection_ids.len();
        let item = QueueItem::new(JobPayload::Analysis(job));
        self.store
            .queue_push(
                topics::ANALYSIS_QUEUE,
                &serde_json::to_string(&item).map_err(PipelineError::serialization)?,
            )
            .await?;

        self.store
            .delete_many(&[
                active_key,
                batch_keys::meta(meta.batch_id.as_str()),
                detections_key,
            ])
            .await?;

        self.metrics.batch_closed(reason);
        self.notify(
            notifications::DETECTION_BATCH,
            json!({
                "batch_id": meta.batch_id,
                "camera_id": meta.camera_id,
                "detection_count": detection_count,
                "close_reason": reason,
            }),
        )
        .await;

        info!(
            camera_id = %meta.camera_id,
            batch_id = %meta.batch_id,
            detection_count,
            close_reason = %reason,
            "batch closed"
        );
        Ok(true)
    }

    /// Close every open batch past its window or idle deadline. Returns how
    /// many batches this sweep closed.
    pub async fn check_timeouts(&self) -> Result<usize, PipelineError> {
        let _sweep_guard = self.sweep_lock.lock().await;

        let window = chrono::Duration::from_std(self.config.window())
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        let idle = chrono::Duration::from_std(self.config.idle_timeout())
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        let mut closed = 0;
        for active_key in self.store.scan_prefix(batch_keys::ACTIVE_PREFIX).await? {
            let Some(camera) = active_key.strip_prefix(batch_keys::ACTIVE_PREFIX) else {
                continue;
            };
            let camera_id = CameraId::new(camera);

            // Same order as add_detection (camera, then close): appends and
            // closes for one camera are mutually exclusive, so a close
            // observes every detection added before its decision.
            let lock = self.camera_lock(&camera_id);
            let _camera_guard = lock.lock().await;

            let Some(batch_id) = self.store.get(&active_key).await? else {
                continue; // closed or expired since the scan
            };
            let Some(raw_meta) = self.store.get(&batch_keys::meta(&batch_id)).await? else {
                warn!(camera_id = %camera_id, batch_id = %batch_id, "dropping orphaned active pointer");
                self.store.delete_many(std::slice::from_ref(&active_key)).await?;
                continue;
            };
            let meta: BatchMeta =
                serde_json::from_str(&raw_meta).map_err(PipelineError::serialization)?;

            if let Some(reason) = meta.due_close_reason(Utc::now(), window, idle) {
                if self.close_batch_locked(&meta, reason).await? {
                    closed += 1;
                }
            }
        }
        Ok(closed)
    }

    /// Operator command: close the camera's open batch now, if any.
    pub async fn flush_camera(&self, camera_id: &CameraId) -> Result<bool, PipelineError> {
        let lock = self.camera_lock(camera_id);
        let _camera_guard = lock.lock().await;

        let active_key = batch_keys::active(camera_id.as_str());
        let Some(batch_id) = self.store.get(&active_key).await? else {
            return Ok(false);
        };
        let Some(raw_meta) = self.store.get(&batch_keys::meta(&batch_id)).await? else {
            return Ok(false);
        };
        let meta: BatchMeta =
            serde_json::from_str(&raw_meta).map_err(PipelineError::serialization)?;
        self.close_batch_locked(&meta, CloseReason::ManualFlush).await
    }

    /// Periodic timeout sweep, registered with the supervisor.
    pub async fn run_timeout_sweep(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        info!(
            interval_secs = self.config.sweep_interval_secs,
            "batch timeout sweep started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.check_timeouts().await {
                        Ok(0) => {}
                        Ok(closed) => debug!(closed, "timeout sweep closed batches"),
                        // Stage-local: a store hiccup must not kill the sweep.
                        Err(e) => error!(error = %e, "timeout sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender means the owner is gone: stop too.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("batch timeout sweep stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn notify(&self, kind: &str, data: serde_json::Value) {
        if let Err(e) = self.broadcaster.publish(kind, data).await {
            warn!(kind = %kind, error = %e, "live notification lost");
        }
    }
}
