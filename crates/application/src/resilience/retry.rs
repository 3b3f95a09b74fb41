//! Exponential backoff with jitter.
//!
//! One policy shared by every outbound call: queue handlers, broadcast
//! publishes and supervisor restarts all derive their delays from
//! [`RetryPolicy::delay_for_attempt`]. Attempts are 0-indexed.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use argus_domain::{Classify, ErrorClass};
use argus_shared::config::RetrySettings;

/// Why a retried operation ultimately failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Classified permanent: aborted without consuming a retry.
    Permanent,
    /// Transient failures survived every allowed attempt.
    Exhausted,
    /// The guarding circuit is open; no retry slot was consumed.
    CircuitOpen,
}

/// Terminal failure of a retried operation. Carries the last error
/// unmodified plus how many invocations the cycle consumed.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    pub kind: FailureKind,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

/// Exponential backoff policy: `min(base * 2^attempt, max)` plus jitter
/// drawn uniformly from 10–30% of that delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// The policy the broadcaster wraps individual publishes with.
    pub fn for_broadcast() -> Self {
        Self::new(2, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Un-jittered delay for `attempt`: `min(base * 2^attempt, max)`.
    pub fn raw_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(63) as i32);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay for `attempt`. The jitter is additive (10–30% of the
    /// raw delay), so the result never drops below the un-jittered value.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay_for_attempt(attempt);
        let jitter_fraction = rand::thread_rng().gen_range(0.10..=0.30);
        raw + raw.mul_f64(jitter_fraction)
    }

    /// Run `op` until it succeeds, fails permanently, hits an open circuit
    /// or exhausts `max_retries`. `op` receives the 0-indexed attempt.
    pub async fn execute<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryFailure<E>>
    where
        E: Classify + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_circuit_open() => {
                    return Err(RetryFailure {
                        attempts: attempt + 1,
                        kind: FailureKind::CircuitOpen,
                        error,
                    });
                }
                Err(error) if error.class() == ErrorClass::Permanent => {
                    return Err(RetryFailure {
                        attempts: attempt + 1,
                        kind: FailureKind::Permanent,
                        error,
                    });
                }
                Err(error) => {
                    if attempt >= self.max_retries {
                        return Err(RetryFailure {
                            attempts: attempt + 1,
                            kind: FailureKind::Exhausted,
                            error,
                        });
                    }
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argus_domain::PipelineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn transient() -> PipelineError {
        PipelineError::DependencyTimeout {
            dependency: "analysis".to_string(),
            timeout_ms: 100,
        }
    }

    fn permanent() -> PipelineError {
        PipelineError::BadRequest {
            dependency: "analysis".to_string(),
            message: "rejected".to_string(),
        }
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        // Production shape: base=1s, max=30s, attempts 0..=4.
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(30));
        let cap = Duration::from_secs(30).mul_f64(1.3);

        let mut previous = Duration::ZERO;
        for attempt in 0..=4 {
            let raw = policy.raw_delay_for_attempt(attempt);
            let jittered = policy.delay_for_attempt(attempt);
            assert!(jittered >= raw, "jitter must never undercut the raw delay");
            assert!(jittered <= raw.mul_f64(1.3) && jittered <= cap);
            assert!(jittered >= previous, "delays must be non-decreasing");
            previous = jittered;
        }
    }

    #[test]
    fn raw_delay_caps_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(policy.raw_delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn permanent_errors_are_never_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), Duration::from_millis(10));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(permanent()) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Permanent);
        assert_eq!(failure.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_returns_the_last_error_and_true_attempt_count() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Exhausted);
        assert_eq!(failure.attempts, 4); // initial call + 3 retries
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            failure.error,
            PipelineError::DependencyTimeout { .. }
        ));
    }

    #[tokio::test]
    async fn transient_failure_recovers_mid_cycle() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(transient())
                    } else {
                        Ok("recovered")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn circuit_open_short_circuits_without_sleeping() {
        let policy = RetryPolicy::new(5, Duration::from_secs(10), Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        let started = Instant::now();
        let result: Result<(), _> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(PipelineError::CircuitOpen {
                        dependency: "analysis".to_string(),
                    })
                }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.kind, FailureKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // No backoff sleep: with a 10s base delay this returns immediately.
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
