//! Error taxonomy for the pipeline.
//!
//! Two independent judgments hang off every error:
//!
//! - [`Classify::class`] — the retry decision. Transient errors are retried
//!   with backoff; permanent errors abort immediately.
//! - [`Classify::trips_breaker`] — the circuit-breaker decision. Defaults to
//!   "transient errors trip", but the two are deliberately separate: a
//!   rejected request (4xx) is permanent *and* breaker-exempt today, and a
//!   future error kind may be transient-but-exempt without touching the
//!   retry path.

use thiserror::Error;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection refused, timeout, 5xx: retry with backoff.
    Transient,
    /// 4xx, malformed response, validation failure: never retried.
    Permanent,
}

/// The two error judgments used by the resilience layer.
pub trait Classify {
    /// Retry decision.
    fn class(&self) -> ErrorClass;

    /// Circuit-breaker decision. Errors returning `false` propagate without
    /// touching the breaker's counters in either direction.
    fn trips_breaker(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True for the distinct "dependency is known-bad right now" rejection.
    /// Callers pattern-match on this instead of an error subclass; it never
    /// consumes a retry slot.
    fn is_circuit_open(&self) -> bool {
        false
    }
}

/// Errors surfaced by pipeline stages and their collaborators.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The dependency could not be reached (connect refused, 5xx, closed).
    #[error("dependency `{dependency}` unavailable: {message}")]
    DependencyUnavailable { dependency: String, message: String },

    /// The dependency did not answer within its deadline.
    #[error("dependency `{dependency}` timed out after {timeout_ms}ms")]
    DependencyTimeout { dependency: String, timeout_ms: u64 },

    /// The dependency rejected the request as invalid (4xx).
    #[error("request rejected by `{dependency}`: {message}")]
    BadRequest { dependency: String, message: String },

    /// The dependency answered with a body the contract does not allow.
    #[error("malformed response from `{dependency}`: {message}")]
    MalformedResponse { dependency: String, message: String },

    /// A shared-store operation failed.
    #[error("store operation failed: {0}")]
    Store(String),

    /// The durable record store failed.
    #[error("record store operation failed: {0}")]
    Records(String),

    /// A payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A queue delivered a payload this handler does not process.
    #[error("unexpected payload on queue `{queue}`: expected {expected}")]
    UnexpectedPayload { queue: String, expected: String },

    /// The circuit guarding a dependency is open; no call was attempted.
    #[error("circuit for `{dependency}` is open, request rejected")]
    CircuitOpen { dependency: String },

    /// A background worker ended for a reason outside the taxonomy above.
    #[error("worker `{worker}` failed: {message}")]
    Worker { worker: String, message: String },
}

impl Classify for PipelineError {
    fn class(&self) -> ErrorClass {
        match self {
            PipelineError::DependencyUnavailable { .. }
            | PipelineError::DependencyTimeout { .. }
            | PipelineError::Store(_)
            | PipelineError::Records(_)
            | PipelineError::Worker { .. } => ErrorClass::Transient,
            PipelineError::BadRequest { .. }
            | PipelineError::MalformedResponse { .. }
            | PipelineError::Serialization(_)
            | PipelineError::UnexpectedPayload { .. }
            | PipelineError::CircuitOpen { .. } => ErrorClass::Permanent,
        }
    }

    fn trips_breaker(&self) -> bool {
        match self {
            // 4xx is excluded by policy: the request was understood and
            // refused, which says nothing about the dependency's health.
            PipelineError::BadRequest { .. } => false,
            other => other.class() == ErrorClass::Transient,
        }
    }

    fn is_circuit_open(&self) -> bool {
        matches!(self, PipelineError::CircuitOpen { .. })
    }
}

impl PipelineError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        PipelineError::Store(err.to_string())
    }

    pub fn serialization(err: impl std::fmt::Display) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}
