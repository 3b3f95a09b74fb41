//! Orchestration core of the Argus pipeline.
//!
//! This crate owns the resilience and coordination machinery: circuit
//! breakers and retry policies guarding every outbound call, queue workers
//! with dead-letter spillover, the per-camera batch aggregator, the live
//! event broadcaster and the worker supervisor that keeps all of it running.
//! External collaborators (store, model services, record store) are reached
//! only through the ports in [`ports`].

pub mod batching;
pub mod broadcast;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod queue;
pub mod resilience;
pub mod supervisor;
