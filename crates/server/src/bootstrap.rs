//! Pipeline assembly.
//!
//! Builds every adapter and service from the loaded configuration and
//! registers the long-running workers with the supervisor. Startup is
//! all-or-nothing: an unusable store configuration halts boot, while
//! dependencies that degrade later are handled by breakers and DLQs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::info;

use argus_application::batching::BatchAggregator;
use argus_application::broadcast::EventBroadcaster;
use argus_application::metrics::{MetricsWorker, PipelineMetrics};
use argus_application::pipeline::{AnalysisJobHandler, DetectionJobHandler};
use argus_application::queue::{DeadLetterService, QueueWorker};
use argus_application::resilience::{CircuitBreakerRegistry, RetryPolicy};
use argus_application::supervisor::WorkerSupervisor;
use argus_infrastructure::{
    HttpAnalysisClient, HttpDetectionClient, MemoryRecordStore, MemoryStore,
};
use argus_shared::config::PipelineConfig;
use argus_shared::topics;

const JANITOR_INTERVAL: Duration = Duration::from_secs(30);
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

pub struct Pipeline {
    pub config: PipelineConfig,
    pub store: Arc<MemoryStore>,
    pub records: Arc<MemoryRecordStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub aggregator: Arc<BatchAggregator>,
    pub dlq: Arc<DeadLetterService>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub metrics: PipelineMetrics,
}

impl Pipeline {
    /// Construct every component. Fails fast on unusable configuration.
    pub fn build(config: PipelineConfig) -> anyhow::Result<Self> {
        if config.store.url != "memory://" {
            bail!(
                "unsupported store url `{}`: this build ships the in-memory adapter only",
                config.store.url
            );
        }
        let store = Arc::new(MemoryStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let metrics = PipelineMetrics::new();
        let breakers = Arc::new(CircuitBreakerRegistry::new(config.breaker));

        let broadcaster = Arc::new(EventBroadcaster::new(
            store.clone(),
            config.broadcast,
            metrics.clone(),
        ));
        let aggregator = Arc::new(BatchAggregator::new(
            store.clone(),
            broadcaster.clone(),
            config.batching,
            metrics.clone(),
        ));
        let dlq = Arc::new(DeadLetterService::new(store.clone(), metrics.clone()));
        let supervisor = Arc::new(WorkerSupervisor::new(config.supervisor, metrics.clone()));

        Ok(Self {
            config,
            store,
            records,
            breakers,
            broadcaster,
            aggregator,
            dlq,
            supervisor,
            metrics,
        })
    }

    /// Register every long-running worker with the supervisor and launch it.
    pub async fn start_workers(&self) -> anyhow::Result<()> {
        let retry = RetryPolicy::from(self.config.retry);
        let pop_timeout = self.config.workers.pop_timeout();
        let max_restarts = self.config.supervisor.max_restarts;
        let inference = Arc::new(Semaphore::new(self.config.workers.inference_concurrency));

        let detection_client = Arc::new(
            HttpDetectionClient::new(&self.config.detection)
                .context("building detection client")?,
        );
        let analysis_client = Arc::new(
            HttpAnalysisClient::new(&self.config.analysis).context("building analysis client")?,
        );

        let detection_handler = Arc::new(DetectionJobHandler::new(
            detection_client,
            self.records.clone(),
            self.aggregator.clone(),
            self.breakers.get_or_create("detection"),
            inference.clone(),
        ));
        let detection_worker = Arc::new(QueueWorker::new(
            topics::DETECTION_QUEUE,
            self.store.clone(),
            detection_handler,
            retry,
            pop_timeout,
            self.metrics.clone(),
        ));
        self.supervisor
            .register("detection-worker", max_restarts, {
                let worker = detection_worker.clone();
                Arc::new(move |shutdown| {
                    let worker = worker.clone();
                    async move { worker.run(shutdown).await }.boxed()
                })
            })
            .await;

        let analysis_handler = Arc::new(AnalysisJobHandler::new(
            analysis_client,
            self.records.clone(),
            self.broadcaster.clone(),
            self.breakers.get_or_create("analysis"),
            inference,
        ));
        let analysis_worker = Arc::new(QueueWorker::new(
            topics::ANALYSIS_QUEUE,
            self.store.clone(),
            analysis_handler,
            retry,
            pop_timeout,
            self.metrics.clone(),
        ));
        self.supervisor
            .register("analysis-worker", max_restarts, {
                let worker = analysis_worker.clone();
                Arc::new(move |shutdown| {
                    let worker = worker.clone();
                    async move { worker.run(shutdown).await }.boxed()
                })
            })
            .await;

        self.supervisor
            .register("batch-timeout-sweep", max_restarts, {
                let aggregator = self.aggregator.clone();
                Arc::new(move |shutdown| {
                    let aggregator = aggregator.clone();
                    async move { aggregator.run_timeout_sweep(shutdown).await }.boxed()
                })
            })
            .await;

        self.supervisor
            .register("broadcast-listener", max_restarts, {
                let broadcaster = self.broadcaster.clone();
                Arc::new(move |shutdown| {
                    broadcaster.clone().run_supervised_listener(shutdown).boxed()
                })
            })
            .await;

        let metrics_worker = Arc::new(MetricsWorker::new(
            self.store.clone(),
            self.breakers.clone(),
            self.metrics.clone(),
            METRICS_INTERVAL,
        ));
        self.supervisor
            .register("metrics-worker", max_restarts, {
                let worker = metrics_worker.clone();
                Arc::new(move |shutdown| {
                    let worker = worker.clone();
                    async move { worker.run(shutdown).await }.boxed()
                })
            })
            .await;

        self.supervisor
            .register("store-janitor", max_restarts, {
                let store = self.store.clone();
                Arc::new(move |shutdown| {
                    let store = store.clone();
                    async move { store.run_janitor(JANITOR_INTERVAL, shutdown).await }.boxed()
                })
            })
            .await;

        info!("all pipeline workers registered");
        Ok(())
    }
}
