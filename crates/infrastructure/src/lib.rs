//! Adapters for the orchestration core's ports.
//!
//! The in-memory store adapter implements the full shared-store contract
//! (atomic multi-key create, TTL expiry, list append, blocking queue pop,
//! pub/sub) for single-node deployments and tests; the port is written
//! against Redis semantics so a Redis adapter can drop in. The HTTP clients
//! talk to the detection and analysis model services with the transport
//! error mapping the error taxonomy expects.

pub mod http;
pub mod records;
pub mod store;

pub use http::{HttpAnalysisClient, HttpDetectionClient};
pub use records::MemoryRecordStore;
pub use store::MemoryStore;
