//! Live-client event broadcasting.
//!
//! Bridges the store's publish/subscribe channel to many concurrent client
//! sessions, adding what a raw channel lacks: strictly increasing sequence
//! numbers, a bounded replay buffer for reconnecting clients, delivery
//! acknowledgment tracking for high-risk events and a supervised channel
//! listener.

mod broadcaster;
mod session;

pub use broadcaster::{AckStatus, EventBroadcaster, ResyncError};
pub use session::{ClientSession, SessionSendError};
