//! Message types exchanged with live clients.
//!
//! The broadcaster stamps every outbound message into an [`Envelope`] with a
//! per-process sequence number; each client session then relays envelopes
//! tagged with its own `seq` counter so clients can detect gaps on either
//! level independently.

use serde::{Deserialize, Serialize};

/// Broadcaster-level message envelope.
///
/// `sequence` is strictly increasing per broadcaster instance and never
/// reused; `requires_ack` marks high-risk events whose delivery is tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub sequence: u64,
    pub requires_ack: bool,
    pub data: serde_json::Value,
}

/// Commands a client may send over its connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Ping,
    Pong,
    Ack { sequence: u64 },
    Resync { data: ResyncRequest },
}

/// Payload of a resync request: the client names the last broadcaster
/// sequence it saw and asks for everything newer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncRequest {
    pub channel: String,
    pub last_sequence: u64,
}

/// Frames a session pushes to its client.
///
/// `seq` is the session's own monotone counter, independent of the
/// broadcaster sequence carried inside relayed envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionFrame {
    /// A broadcast message relayed to this client.
    Relay { seq: u64, message: Envelope },
    /// Heartbeat carrying the last broadcaster sequence relayed to this
    /// client, so idle connections stay gap-detectable.
    Ping { seq: u64, last_sequence: u64 },
    /// Answer to a client-initiated ping.
    Pong { seq: u64 },
    /// Replayed messages answering a resync request, oldest first.
    Resync { seq: u64, messages: Vec<Envelope> },
    /// The gap exceeded the replay buffer; the client must re-fetch state
    /// through the REST layer. Never a silent truncation.
    ResyncFailed {
        seq: u64,
        last_sequence: u64,
        oldest_available: u64,
        reason: String,
    },
}
