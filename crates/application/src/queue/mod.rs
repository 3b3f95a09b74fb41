//! Queue consumption: the generic pull-process-ack worker and the
//! dead-letter queue it spills exhausted work into.

mod dlq;
mod worker;

pub use dlq::{DeadLetterService, DlqPage, DlqStats};
pub use worker::{JobHandler, QueueWorker};
