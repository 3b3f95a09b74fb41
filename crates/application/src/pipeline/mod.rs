//! Stage handlers for the two pipeline queues.
//!
//! Both stages share the same shape: a counting semaphore bounds in-flight
//! model calls across all workers (backpressure against shared compute, not
//! fault isolation), and the per-dependency circuit breaker wraps the call
//! itself. Retries happen one level up, in the queue worker.

mod analysis;
mod detection;

pub use analysis::AnalysisJobHandler;
pub use detection::DetectionJobHandler;
