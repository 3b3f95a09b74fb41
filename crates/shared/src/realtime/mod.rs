//! Realtime wire protocol shared between the broadcaster and live clients.

mod messages;

pub use messages::{ClientCommand, Envelope, ResyncRequest, SessionFrame};
