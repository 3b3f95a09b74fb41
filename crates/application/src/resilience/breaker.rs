//! Per-dependency circuit breaker.
//!
//! State machine: Closed → (failure_threshold consecutive failures) → Open →
//! (recovery_timeout elapses, next call admitted as a probe) → HalfOpen →
//! (success_threshold consecutive successes) → Closed, or (any failure) →
//! Open again. Errors whose [`Classify::trips_breaker`] is `false` pass
//! through without touching the counters in either direction.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{info, warn};

use argus_domain::{Classify, PipelineError};
use argus_shared::config::CircuitBreakerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Result of a call placed through a breaker.
///
/// `Open` is a distinct variant rather than an error subclass so callers can
/// pattern-match "dependency is known-bad right now" apart from "this one
/// call failed".
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit `{name}` is open, request rejected")]
    Open { name: String },

    #[error("{0}")]
    Inner(E),
}

impl From<BreakerError<PipelineError>> for PipelineError {
    fn from(err: BreakerError<PipelineError>) -> Self {
        match err {
            BreakerError::Open { name } => PipelineError::CircuitOpen { dependency: name },
            BreakerError::Inner(e) => e,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_state_change: Instant,
    half_open_in_flight: u32,
}

/// Fault isolation for one named dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
}

/// Point-in-time view of one breaker, for health reporting.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub seconds_in_state: f64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_state_change: Instant::now(),
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Place `operation` through the breaker.
    pub async fn call<T, E, Fut>(&self, operation: Fut) -> Result<T, BreakerError<E>>
    where
        E: Classify,
        Fut: Future<Output = Result<T, E>>,
    {
        let admitted_as_probe = self.admit()?;

        let outcome = operation.await;

        let mut inner = self.inner.lock().unwrap();
        if admitted_as_probe {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            Ok(value) => {
                self.on_success(&mut inner);
                Ok(value)
            }
            Err(e) if !e.trips_breaker() => {
                // Excluded failure: an ordinary error, invisible to the
                // breaker's counters.
                Err(BreakerError::Inner(e))
            }
            Err(e) => {
                self.on_failure(&mut inner);
                Err(BreakerError::Inner(e))
            }
        }
    }

    /// Admission control. Returns whether the call counts against the
    /// half-open probe budget. The Open → HalfOpen transition happens here,
    /// before the admitted call executes.
    fn admit<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.state == CircuitState::Open {
            if inner.last_state_change.elapsed() >= self.settings.recovery_timeout() {
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_failures = 0;
                inner.consecutive_successes = 0;
                inner.half_open_in_flight = 0;
                inner.last_state_change = Instant::now();
                info!(circuit = %self.name, "circuit transitioned to half_open");
            } else {
                return Err(BreakerError::Open {
                    name: self.name.clone(),
                });
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.settings.half_open_max_calls {
                    return Err(BreakerError::Open {
                        name: self.name.clone(),
                    });
                }
                inner.half_open_in_flight += 1;
                Ok(true)
            }
            CircuitState::Open => unreachable!("open state handled above"),
        }
    }

    fn on_success(&self, inner: &mut BreakerInner) {
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.consecutive_successes += 1;
            if inner.consecutive_successes >= self.settings.success_threshold {
                inner.state = CircuitState::Closed;
                inner.consecutive_successes = 0;
                inner.last_state_change = Instant::now();
                info!(circuit = %self.name, "circuit closed");
            }
        }
    }

    fn on_failure(&self, inner: &mut BreakerInner) {
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                // One failed probe reopens immediately; the recovery timer
                // restarts from now.
                inner.state = CircuitState::Open;
                inner.consecutive_failures = 0;
                inner.last_state_change = Instant::now();
                warn!(circuit = %self.name, "probe failed, circuit reopened");
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.settings.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_state_change = Instant::now();
                    warn!(
                        circuit = %self.name,
                        failures = inner.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Force the breaker Closed with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.half_open_in_flight = 0;
        inner.last_state_change = Instant::now();
        info!(circuit = %self.name, "circuit manually reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().unwrap();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            seconds_in_state: inner.last_state_change.elapsed().as_secs_f64(),
        }
    }
}

/// Named registry of per-dependency breakers.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: CircuitBreakerSettings,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    /// The breaker for `name`, created with the registry defaults on first
    /// lookup.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.defaults)))
            .clone()
    }

    /// Point-in-time read of every registered breaker.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|e| e.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Manually reset one breaker. Returns `false` for unknown names.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_domain::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    // recovery_timeout_secs of 0 makes the next call after opening a probe;
    // 60 keeps the breaker firmly open for the duration of a test.
    fn settings(failures: u32, successes: u32, recovery_secs: u64) -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold: failures,
            success_threshold: successes,
            recovery_timeout_secs: recovery_secs,
            half_open_max_calls: 2,
        }
    }

    fn transient() -> PipelineError {
        PipelineError::DependencyUnavailable {
            dependency: "detection".to_string(),
            message: "connection refused".to_string(),
        }
    }

    fn excluded() -> PipelineError {
        PipelineError::BadRequest {
            dependency: "detection".to_string(),
            message: "bad camera id".to_string(),
        }
    }

    async fn fail_call(breaker: &CircuitBreaker, calls: &AtomicU32) -> bool {
        let result: Result<(), _> = breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
        matches!(result, Err(BreakerError::Open { .. }))
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures_and_rejects_without_invoking() {
        let breaker = CircuitBreaker::new("detection", settings(3, 1, 60));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(!fail_call(&breaker, &calls).await);
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Rejected at the door: the underlying function must not run.
        assert!(fail_call(&breaker, &calls).await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn a_success_resets_the_failure_streak_while_closed() {
        let breaker = CircuitBreaker::new("detection", settings(3, 1, 60));
        let calls = AtomicU32::new(0);

        fail_call(&breaker, &calls).await;
        fail_call(&breaker, &calls).await;
        let ok: Result<&str, BreakerError<PipelineError>> =
            breaker.call(async { Ok("fine") }).await;
        assert!(ok.is_ok());

        // Two more failures stay below the threshold after the reset.
        fail_call(&breaker, &calls).await;
        fail_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn excluded_errors_never_trip_the_breaker() {
        let breaker = CircuitBreaker::new("detection", settings(2, 1, 60));
        for _ in 0..10 {
            let result: Result<(), _> = breaker.call(async { Err(excluded()) }).await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn recovery_timeout_admits_a_probe_and_success_closes() {
        let breaker = CircuitBreaker::new("detection", settings(1, 1, 0));
        let calls = AtomicU32::new(0);

        fail_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_timeout is zero: the next call is admitted as a probe.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let ok: Result<&str, BreakerError<PipelineError>> =
            breaker.call(async { Ok("recovered") }).await;
        assert!(ok.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn one_half_open_failure_reopens_regardless_of_prior_successes() {
        let mut s = settings(1, 3, 0);
        s.half_open_max_calls = 3;
        let breaker = CircuitBreaker::new("detection", s);
        let calls = AtomicU32::new(0);

        fail_call(&breaker, &calls).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Two successful probes, below the success threshold of three.
        for _ in 0..2 {
            let ok: Result<(), BreakerError<PipelineError>> = breaker.call(async { Ok(()) }).await;
            assert!(ok.is_ok());
        }
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        fail_call(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_probe_budget_rejects_excess_concurrent_calls() {
        let mut s = settings(1, 2, 0);
        s.half_open_max_calls = 1;
        let breaker = Arc::new(CircuitBreaker::new("detection", s));
        let calls = AtomicU32::new(0);

        fail_call(&breaker, &calls).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let (unblock_tx, unblock_rx) = tokio::sync::oneshot::channel::<()>();
        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            let result: Result<(), BreakerError<PipelineError>> = probe_breaker
                .call(async {
                    let _ = unblock_rx.await;
                    Ok(())
                })
                .await;
            result
        });

        // Give the probe time to be admitted and block.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let rejected: Result<(), BreakerError<PipelineError>> =
            breaker.call(async { Ok(()) }).await;
        assert!(matches!(rejected, Err(BreakerError::Open { .. })));

        unblock_tx.send(()).unwrap();
        assert!(probe.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn registry_reuses_instances_and_resets_by_name() {
        let registry = CircuitBreakerRegistry::new(settings(1, 1, 60));
        let a = registry.get_or_create("analysis");
        let b = registry.get_or_create("analysis");
        assert!(Arc::ptr_eq(&a, &b));

        let calls = AtomicU32::new(0);
        fail_call(&a, &calls).await;
        assert_eq!(a.state(), CircuitState::Open);

        assert!(registry.reset("analysis"));
        assert_eq!(a.state(), CircuitState::Closed);
        assert!(!registry.reset("unknown"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "analysis");
    }
}
