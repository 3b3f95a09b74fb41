//! One live client connection.
//!
//! The session owns a bounded outbound channel drained by the interface
//! layer (a websocket, in practice). Every relayed envelope is tagged with
//! the session's own monotone `seq`, so a client can detect gaps in its own
//! feed independent of the broadcaster's sequence. Sends never block: a full
//! channel drops the frame and counts it, matching the backpressure posture
//! of the rest of the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::warn;

use argus_domain::PipelineError;
use argus_shared::ids::SessionId;
use argus_shared::realtime::{ClientCommand, Envelope, SessionFrame};

use crate::metrics::PipelineMetrics;

use super::broadcaster::EventBroadcaster;

#[derive(Debug, thiserror::Error)]
pub enum SessionSendError {
    #[error("outbound channel full")]
    Backpressure,

    #[error("session closed")]
    Closed,
}

pub struct ClientSession {
    id: SessionId,
    outbound: mpsc::Sender<String>,
    seq: AtomicU64,
    last_relayed_sequence: AtomicU64,
    last_activity: Mutex<Instant>,
    dropped: AtomicU64,
    metrics: PipelineMetrics,
}

impl ClientSession {
    pub fn new(outbound: mpsc::Sender<String>, metrics: PipelineMetrics) -> Self {
        Self {
            id: SessionId::new(),
            outbound,
            seq: AtomicU64::new(0),
            last_relayed_sequence: AtomicU64::new(0),
            last_activity: Mutex::new(Instant::now()),
            dropped: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Mark client traffic; idle disconnection keys off this.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().unwrap().elapsed()
    }

    /// Frames dropped on backpressure since the session connected.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// The broadcaster sequence most recently relayed to this client.
    pub fn last_relayed_sequence(&self) -> u64 {
        self.last_relayed_sequence.load(Ordering::SeqCst)
    }

    /// Relay one broadcast envelope, tagged with this session's `seq`.
    pub fn relay(&self, envelope: &Envelope) -> Result<(), SessionSendError> {
        let sequence = envelope.sequence;
        let frame = SessionFrame::Relay {
            seq: self.next_seq(),
            message: envelope.clone(),
        };
        self.send_frame(frame)?;
        self.last_relayed_sequence.store(sequence, Ordering::SeqCst);
        Ok(())
    }

    /// Heartbeat carrying the last relayed sequence for gap detection on
    /// idle connections.
    pub fn send_ping(&self) -> Result<(), SessionSendError> {
        self.send_frame(SessionFrame::Ping {
            seq: self.next_seq(),
            last_sequence: self.last_relayed_sequence(),
        })
    }

    fn send_frame(&self, frame: SessionFrame) -> Result<(), SessionSendError> {
        let encoded = match serde_json::to_string(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to encode frame");
                return Ok(());
            }
        };
        match self.outbound.try_send(encoded) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.broadcast_dropped();
                Err(SessionSendError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SessionSendError::Closed),
        }
    }

    /// Process one inbound client frame: heartbeats, delivery acks and
    /// resync requests.
    pub fn handle_client_text(
        &self,
        text: &str,
        broadcaster: &EventBroadcaster,
    ) -> Result<(), PipelineError> {
        let command: ClientCommand =
            serde_json::from_str(text).map_err(PipelineError::serialization)?;
        self.touch();

        match command {
            ClientCommand::Ping => {
                let _ = self.send_frame(SessionFrame::Pong {
                    seq: self.next_seq(),
                });
            }
            ClientCommand::Pong => {}
            ClientCommand::Ack { sequence } => {
                if !broadcaster.record_ack(&self.id, sequence) {
                    warn!(
                        session_id = %self.id,
                        sequence,
                        "ack for untracked sequence"
                    );
                }
            }
            ClientCommand::Resync { data } => match broadcaster.resync(data.last_sequence) {
                Ok(messages) => {
                    let _ = self.send_frame(SessionFrame::Resync {
                        seq: self.next_seq(),
                        messages,
                    });
                }
                Err(super::broadcaster::ResyncError::CannotReplay {
                    last_sequence,
                    oldest_available,
                }) => {
                    let _ = self.send_frame(SessionFrame::ResyncFailed {
                        seq: self.next_seq(),
                        last_sequence,
                        oldest_available,
                        reason: "gap exceeds replay buffer, re-fetch state".to_string(),
                    });
                }
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(sequence: u64) -> Envelope {
        Envelope {
            kind: "detection.new".to_string(),
            sequence,
            requires_ack: false,
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn relayed_frames_carry_the_sessions_own_sequence() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = ClientSession::new(tx, PipelineMetrics::new());

        // Broadcaster sequences with a gap; session seq stays dense.
        session.relay(&envelope(10)).unwrap();
        session.relay(&envelope(12)).unwrap();

        for expected_seq in 1..=2u64 {
            let frame: SessionFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            match frame {
                SessionFrame::Relay { seq, .. } => assert_eq!(seq, expected_seq),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert_eq!(session.last_relayed_sequence(), 12);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let session = ClientSession::new(tx, PipelineMetrics::new());

        session.relay(&envelope(1)).unwrap();
        let result = session.relay(&envelope(2));
        assert!(matches!(result, Err(SessionSendError::Backpressure)));
        assert_eq!(session.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn ping_carries_the_last_relayed_sequence() {
        let (tx, mut rx) = mpsc::channel(8);
        let session = ClientSession::new(tx, PipelineMetrics::new());

        session.relay(&envelope(7)).unwrap();
        session.send_ping().unwrap();

        let _relay = rx.recv().await.unwrap();
        let frame: SessionFrame = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match frame {
            SessionFrame::Ping { last_sequence, .. } => assert_eq!(last_sequence, 7),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
