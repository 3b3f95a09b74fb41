//! Worker supervision.
//!
//! The supervisor owns the lifecycle of every long-running background task:
//! it launches each worker from a restartable factory, watches the join
//! handles from a monitoring loop, restarts crashed workers with the shared
//! backoff and gives up (status `Failed`, manual reset required) once the
//! restart ceiling is exceeded. Ownership is strictly one-directional —
//! workers receive a shutdown receiver and never hold a supervisor
//! reference back.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use argus_domain::{PipelineError, RestartAttempt, RestartOutcome, WorkerRecord, WorkerStatus};
use argus_shared::config::SupervisorConfig;

use crate::metrics::PipelineMetrics;
use crate::resilience::RetryPolicy;

const HISTORY_LIMIT: usize = 1_000;

/// A restartable worker body. Called once per launch with a fresh shutdown
/// receiver; returning `Err` (or returning at all without being asked to
/// stop) counts as a crash.
pub type WorkerFactory =
    Arc<dyn Fn(watch::Receiver<bool>) -> BoxFuture<'static, Result<(), PipelineError>> + Send + Sync>;

/// Outcome of an operator command. Commands are idempotent: asking for a
/// state the worker is already in reports rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Applied,
    AlreadyInState(WorkerStatus),
}

struct SupervisedWorker {
    record: WorkerRecord,
    factory: WorkerFactory,
    handle: Option<JoinHandle<Result<(), PipelineError>>>,
    stop_tx: Option<watch::Sender<bool>>,
    restart_at: Option<Instant>,
}

impl SupervisedWorker {
    fn launch(&mut self) {
        let (stop_tx, stop_rx) = watch::channel(false);
        self.handle = Some(tokio::spawn((self.factory)(stop_rx)));
        self.stop_tx = Some(stop_tx);
        self.restart_at = None;
        self.record.status = WorkerStatus::Running;
        self.record.last_started_at = Some(Utc::now());
    }

    fn signal_stop(&self) {
        if let Some(stop_tx) = &self.stop_tx {
            let _ = stop_tx.send(true);
        }
    }
}

pub struct WorkerSupervisor {
    workers: Mutex<HashMap<String, SupervisedWorker>>,
    history: std::sync::Mutex<VecDeque<RestartAttempt>>,
    config: SupervisorConfig,
    backoff: RetryPolicy,
    metrics: PipelineMetrics,
}

impl WorkerSupervisor {
    pub fn new(config: SupervisorConfig, metrics: PipelineMetrics) -> Self {
        let backoff = RetryPolicy::new(
            u32::MAX, // the ceiling lives in WorkerRecord, not the backoff
            config.restart_base_delay(),
            config.restart_max_delay(),
        );
        Self {
            workers: Mutex::new(HashMap::new()),
            history: std::sync::Mutex::new(VecDeque::new()),
            config,
            backoff,
            metrics,
        }
    }

    /// Register a worker and launch it immediately.
    pub async fn register(
        &self,
        name: impl Into<String>,
        max_restarts: u32,
        factory: WorkerFactory,
    ) {
        let name = name.into();
        let mut worker = SupervisedWorker {
            record: WorkerRecord::new(name.clone(), max_restarts),
            factory,
            handle: None,
            stop_tx: None,
            restart_at: None,
        };
        worker.launch();
        info!(worker = %name, max_restarts, "worker registered and started");
        self.workers.lock().await.insert(name, worker);
    }

    /// Monitoring loop: detect terminated workers, schedule and perform
    /// restarts. Runs until the shutdown signal fires.
    pub async fn run_monitor(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_interval());
        info!(
            interval_secs = self.config.check_interval_secs,
            "supervisor monitor started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("supervisor monitor stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One monitoring pass. The monitor loop calls this on every tick.
    pub async fn poll_once(&self) {
        let mut workers = self.workers.lock().await;
        for worker in workers.values_mut() {
            // Due restarts first, so a crash and its restart are separate
            // passes and the backoff delay is actually honored.
            if let Some(restart_at) = worker.restart_at {
                if Instant::now() >= restart_at {
                    worker.launch();
                    info!(
                        worker = %worker.record.name,
                        restart_count = worker.record.restart_count,
                        "worker restarted"
                    );
                }
                continue;
            }

            let finished = worker
                .handle
                .as_ref()
                .map(|h| h.is_finished())
                .unwrap_or(false);
            if !finished {
                continue;
            }

            let Some(handle) = worker.handle.take() else {
                continue;
            };
            let termination = match handle.await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(join_err) if join_err.is_panic() => Some(format!("panic: {join_err}")),
                Err(join_err) => Some(join_err.to_string()),
            };

            if worker.record.status == WorkerStatus::Stopped {
                // Operator-requested stop; nothing to do.
                continue;
            }

            // A worker loop runs until asked to stop. Returning cleanly
            // without a stop request is still an unexpected termination.
            let error =
                termination.unwrap_or_else(|| "terminated unexpectedly".to_string());
            self.handle_crash(worker, error);
        }
    }

    fn handle_crash(&self, worker: &mut SupervisedWorker, error: String) {
        let record = &mut worker.record;
        record.status = WorkerStatus::Crashed;
        record.last_crashed_at = Some(Utc::now());
        record.last_error = Some(error.clone());
        record.restart_count += 1;

        if record.exhausted() {
            record.status = WorkerStatus::Failed;
            error!(
                worker = %record.name,
                restart_count = record.restart_count,
                max_restarts = record.max_restarts,
                error = %error,
                "worker exceeded its restart budget, marking failed"
            );
            self.push_history(RestartAttempt {
                worker: record.name.clone(),
                attempt: record.restart_count,
                at: Utc::now(),
                outcome: RestartOutcome::GaveUp,
                error: Some(error),
            });
            return;
        }

        let delay = self.backoff.delay_for_attempt(record.restart_count - 1);
        record.status = WorkerStatus::Restarting;
        worker.restart_at = Some(Instant::now() + delay);
        self.metrics.worker_restarted(&record.name);
        warn!(
            worker = %record.name,
            restart_count = record.restart_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "worker crashed, restart scheduled"
        );
        self.push_history(RestartAttempt {
            worker: record.name.clone(),
            attempt: record.restart_count,
            at: Utc::now(),
            outcome: RestartOutcome::Restarted,
            error: Some(error),
        });
    }

    fn push_history(&self, attempt: RestartAttempt) {
        let mut history = self.history.lock().unwrap();
        if history.len() >= HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(attempt);
    }

    // Operator surface -------------------------------------------------------

    pub async fn start(&self, name: &str) -> Result<CommandOutcome, PipelineError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(name).ok_or_else(|| unknown_worker(name))?;
        match worker.record.status {
            WorkerStatus::Running | WorkerStatus::Restarting => {
                Ok(CommandOutcome::AlreadyInState(worker.record.status))
            }
            _ => {
                worker.launch();
                info!(worker = %name, "worker started by operator");
                Ok(CommandOutcome::Applied)
            }
        }
    }

    pub async fn stop(&self, name: &str) -> Result<CommandOutcome, PipelineError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(name).ok_or_else(|| unknown_worker(name))?;
        match worker.record.status {
            WorkerStatus::Running | WorkerStatus::Restarting => {
                worker.record.status = WorkerStatus::Stopped;
                worker.restart_at = None;
                worker.signal_stop();
                info!(worker = %name, "worker stopped by operator");
                Ok(CommandOutcome::Applied)
            }
            status => Ok(CommandOutcome::AlreadyInState(status)),
        }
    }

    /// Stop (if needed) and relaunch. Does not count against the restart
    /// budget: operator restarts are maintenance, not crashes.
    pub async fn restart(&self, name: &str) -> Result<CommandOutcome, PipelineError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(name).ok_or_else(|| unknown_worker(name))?;

        worker.record.status = WorkerStatus::Stopped;
        worker.signal_stop();
        if let Some(mut handle) = worker.handle.take() {
            // Give the loop a window to observe the signal, then cut it
            // loose so the relaunch never runs alongside the old task.
            if tokio::time::timeout(Duration::from_secs(5), &mut handle)
                .await
                .is_err()
            {
                warn!(worker = %name, "worker ignored stop signal, aborting");
                handle.abort();
            }
        }
        worker.launch();
        info!(worker = %name, "worker restarted by operator");
        Ok(CommandOutcome::Applied)
    }

    /// Zero the restart counter and re-arm auto-restart. A `Failed` worker
    /// is relaunched.
    pub async fn reset(&self, name: &str) -> Result<CommandOutcome, PipelineError> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(name).ok_or_else(|| unknown_worker(name))?;
        worker.record.restart_count = 0;
        worker.record.last_error = None;
        if worker.record.status == WorkerStatus::Failed {
            worker.launch();
        }
        info!(worker = %name, "worker restart budget reset");
        Ok(CommandOutcome::Applied)
    }

    /// Snapshot of every worker record.
    pub async fn status(&self) -> Vec<WorkerRecord> {
        let workers = self.workers.lock().await;
        let mut records: Vec<_> = workers.values().map(|w| w.record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Restart history, newest first. Page numbering starts at 0.
    pub fn restart_history(&self, page: usize, page_size: usize) -> Vec<RestartAttempt> {
        let history = self.history.lock().unwrap();
        history
            .iter()
            .rev()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect()
    }

    /// Signal every worker to stop and wait up to `grace` for them to
    /// drain; stragglers are aborted.
    pub async fn shutdown_all(&self, grace: Duration) {
        let mut workers = self.workers.lock().await;
        for worker in workers.values_mut() {
            worker.record.status = WorkerStatus::Stopped;
            worker.restart_at = None;
            worker.signal_stop();
        }

        let deadline = Instant::now() + grace;
        for (name, worker) in workers.iter_mut() {
            if let Some(handle) = worker.handle.take() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, handle).await {
                    Ok(_) => {}
                    Err(_) => {
                        warn!(worker = %name, "worker did not drain within the grace period");
                    }
                }
            }
        }
        info!("all workers stopped");
    }
}

fn unknown_worker(name: &str) -> PipelineError {
    PipelineError::Worker {
        worker: name.to_string(),
        message: "not registered".to_string(),
    }
}
