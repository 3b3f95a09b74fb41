//! Pipeline metrics.
//!
//! One Prometheus handle shared by every component. Counters are bumped at
//! the call sites; the depth gauges are refreshed by a periodic worker that
//! is supervised like everything else, so a dead metrics loop is visible
//! instead of silently stale.

use prometheus::{IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::ports::SharedStore;
use crate::resilience::{CircuitBreakerRegistry, CircuitState};
use argus_domain::{CloseReason, PipelineError};
use argus_shared::topics;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: Registry,
    jobs_processed: IntCounterVec,
    jobs_failed: IntCounterVec,
    jobs_dead_lettered: IntCounterVec,
    jobs_requeued: IntCounterVec,
    batches_closed: IntCounterVec,
    detections_batched: IntCounter,
    broadcast_published: IntCounter,
    broadcast_acks: IntCounter,
    broadcast_dropped: IntCounter,
    sessions_active: IntGauge,
    queue_depth: IntGaugeVec,
    dlq_depth: IntGaugeVec,
    breaker_state: IntGaugeVec,
    worker_restarts: IntCounterVec,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let jobs_processed = IntCounterVec::new(
            Opts::new("argus_jobs_processed_total", "Jobs processed successfully"),
            &["queue"],
        )
        .unwrap();
        let jobs_failed = IntCounterVec::new(
            Opts::new("argus_jobs_failed_total", "Jobs that failed a cycle"),
            &["queue", "kind"],
        )
        .unwrap();
        let jobs_dead_lettered = IntCounterVec::new(
            Opts::new("argus_jobs_dead_lettered_total", "Jobs moved to a DLQ"),
            &["queue"],
        )
        .unwrap();
        let jobs_requeued = IntCounterVec::new(
            Opts::new("argus_jobs_requeued_total", "Jobs requeued from a DLQ"),
            &["queue"],
        )
        .unwrap();
        let batches_closed = IntCounterVec::new(
            Opts::new("argus_batches_closed_total", "Batches closed"),
            &["reason"],
        )
        .unwrap();
        let detections_batched = IntCounter::new(
            "argus_detections_batched_total",
            "Detections appended to batches",
        )
        .unwrap();
        let broadcast_published = IntCounter::new(
            "argus_broadcast_published_total",
            "Messages published to live clients",
        )
        .unwrap();
        let broadcast_acks = IntCounter::new(
            "argus_broadcast_acks_total",
            "Delivery acknowledgments recorded",
        )
        .unwrap();
        let broadcast_dropped = IntCounter::new(
            "argus_broadcast_dropped_total",
            "Frames dropped on session backpressure",
        )
        .unwrap();
        let sessions_active =
            IntGauge::new("argus_sessions_active", "Connected live client sessions").unwrap();
        let queue_depth = IntGaugeVec::new(
            Opts::new("argus_queue_depth", "Items waiting in a queue"),
            &["queue"],
        )
        .unwrap();
        let dlq_depth = IntGaugeVec::new(
            Opts::new("argus_dlq_depth", "Items stuck in a dead-letter queue"),
            &["queue"],
        )
        .unwrap();
        let breaker_state = IntGaugeVec::new(
            Opts::new(
                "argus_breaker_state",
                "Circuit state per dependency (0=closed, 1=half_open, 2=open)",
            ),
            &["dependency"],
        )
        .unwrap();
        let worker_restarts = IntCounterVec::new(
            Opts::new("argus_worker_restarts_total", "Supervised worker restarts"),
            &["worker"],
        )
        .unwrap();

        for collector in [
            &jobs_processed,
            &jobs_failed,
            &jobs_dead_lettered,
            &jobs_requeued,
            &batches_closed,
        ] {
            registry.register(Box::new(collector.clone())).unwrap();
        }
        registry
            .register(Box::new(detections_batched.clone()))
            .unwrap();
        registry
            .register(Box::new(broadcast_published.clone()))
            .unwrap();
        registry.register(Box::new(broadcast_acks.clone())).unwrap();
        registry
            .register(Box::new(broadcast_dropped.clone()))
            .unwrap();
        registry.register(Box::new(sessions_active.clone())).unwrap();
        registry.register(Box::new(queue_depth.clone())).unwrap();
        registry.register(Box::new(dlq_depth.clone())).unwrap();
        registry.register(Box::new(breaker_state.clone())).unwrap();
        registry
            .register(Box::new(worker_restarts.clone()))
            .unwrap();

        Self {
            inner: Arc::new(Inner {
                registry,
                jobs_processed,
                jobs_failed,
                jobs_dead_lettered,
                jobs_requeued,
                batches_closed,
                detections_batched,
                broadcast_published,
                broadcast_acks,
                broadcast_dropped,
                sessions_active,
                queue_depth,
                dlq_depth,
                breaker_state,
                worker_restarts,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn job_processed(&self, queue: &str) {
        self.inner.jobs_processed.with_label_values(&[queue]).inc();
    }

    pub fn job_failed(&self, queue: &str, kind: &str) {
        self.inner
            .jobs_failed
            .with_label_values(&[queue, kind])
            .inc();
    }

    pub fn job_dead_lettered(&self, queue: &str) {
        self.inner
            .jobs_dead_lettered
            .with_label_values(&[queue])
            .inc();
    }

    pub fn job_requeued(&self, queue: &str) {
        self.inner.jobs_requeued.with_label_values(&[queue]).inc();
    }

    pub fn batch_closed(&self, reason: CloseReason) {
        self.inner
            .batches_closed
            .with_label_values(&[&reason.to_string()])
            .inc();
    }

    pub fn detection_batched(&self) {
        self.inner.detections_batched.inc();
    }

    pub fn broadcast_published(&self) {
        self.inner.broadcast_published.inc();
    }

    pub fn broadcast_ack(&self) {
        self.inner.broadcast_acks.inc();
    }

    pub fn broadcast_dropped(&self) {
        self.inner.broadcast_dropped.inc();
    }

    pub fn session_connected(&self) {
        self.inner.sessions_active.inc();
    }

    pub fn session_disconnected(&self) {
        self.inner.sessions_active.dec();
    }

    pub fn worker_restarted(&self, worker: &str) {
        self.inner.worker_restarts.with_label_values(&[worker]).inc();
    }

    fn set_queue_depth(&self, queue: &str, depth: usize) {
        self.inner
            .queue_depth
            .with_label_values(&[queue])
            .set(depth as i64);
    }

    fn set_dlq_depth(&self, queue: &str, depth: usize) {
        self.inner
            .dlq_depth
            .with_label_values(&[queue])
            .set(depth as i64);
    }

    fn set_breaker_state(&self, dependency: &str, state: CircuitState) {
        let value = match state {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        };
        self.inner
            .breaker_state
            .with_label_values(&[dependency])
            .set(value);
    }
}

/// Periodic gauge refresher, registered with the supervisor as the
/// `metrics-worker`.
pub struct MetricsWorker {
    store: Arc<dyn SharedStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    metrics: PipelineMetrics,
    interval: Duration,
}

impl MetricsWorker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        breakers: Arc<CircuitBreakerRegistry>,
        metrics: PipelineMetrics,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            breakers,
            metrics,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        warn!(error = %e, "metrics refresh failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("metrics worker shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn refresh(&self) -> Result<(), PipelineError> {
        for queue in [topics::DETECTION_QUEUE, topics::ANALYSIS_QUEUE] {
            let depth = self.store.queue_len(queue).await?;
            self.metrics.set_queue_depth(queue, depth);
            let dlq_depth = self.store.queue_len(&topics::dlq_for(queue)).await?;
            self.metrics.set_dlq_depth(queue, dlq_depth);
        }
        for snapshot in self.breakers.snapshot() {
            self.metrics.set_breaker_state(&snapshot.name, snapshot.state);
        }
        Ok(())
    }
}
