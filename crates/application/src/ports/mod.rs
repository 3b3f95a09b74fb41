//! Outbound ports.
//!
//! The orchestration core talks to every external collaborator through these
//! traits: the shared store (state, queues, pub/sub), the two model services
//! and the durable record store. Adapters live in `argus-infrastructure`.

mod model;
mod records;
mod store;

pub use model::{AnalysisClient, DetectionClient};
pub use records::RecordStore;
pub use store::SharedStore;
