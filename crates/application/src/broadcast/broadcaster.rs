//! The event broadcaster.
//!
//! `publish` stamps each message with the next sequence number, appends it
//! to the replay ring buffer and pushes it through the store's pub/sub
//! channel, retried with the shared policy. A listener task subscribes to
//! that channel and fans incoming envelopes out to every registered session;
//! its own supervision loop restarts it with backoff, bounded attempts.
//!
//! The replay buffer and ack table are deliberately process-local:
//! multi-instance deployments get independent buffers and gap *detection*,
//! not cross-instance replay.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use argus_domain::{PipelineError, SecurityEvent};
use argus_shared::config::BroadcastConfig;
use argus_shared::ids::SessionId;
use argus_shared::realtime::Envelope;
use argus_shared::topics::{notifications, EVENTS_CHANNEL};

use crate::metrics::PipelineMetrics;
use crate::ports::SharedStore;
use crate::resilience::RetryPolicy;

use super::session::{ClientSession, SessionSendError};

/// Replay request outcome when the gap exceeds the buffer.
#[derive(Debug, thiserror::Error)]
pub enum ResyncError {
    #[error(
        "cannot replay from sequence {last_sequence}: oldest buffered is {oldest_available}"
    )]
    CannotReplay {
        last_sequence: u64,
        oldest_available: u64,
    },
}

/// Delivery-acknowledgment state of one `requires_ack` message.
#[derive(Debug, Clone)]
pub struct AckStatus {
    pub sequence: u64,
    pub published_at: DateTime<Utc>,
    pub acked_by: Vec<SessionId>,
}

#[derive(Debug)]
struct AckRecord {
    published_at: DateTime<Utc>,
    acked_by: HashSet<SessionId>,
}

pub struct EventBroadcaster {
    store: Arc<dyn SharedStore>,
    config: BroadcastConfig,
    sequence: AtomicU64,
    buffer: Mutex<VecDeque<Envelope>>,
    acks: DashMap<u64, AckRecord>,
    sessions: DashMap<Uuid, Arc<ClientSession>>,
    retry: RetryPolicy,
    metrics: PipelineMetrics,
}

impl EventBroadcaster {
    pub fn new(
        store: Arc<dyn SharedStore>,
        config: BroadcastConfig,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            store,
            config,
            sequence: AtomicU64::new(0),
            buffer: Mutex::new(VecDeque::with_capacity(config.buffer_size)),
            acks: DashMap::new(),
            sessions: DashMap::new(),
            retry: RetryPolicy::for_broadcast(),
            metrics,
        }
    }

    /// Sequence of the most recently published message.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Publish one message to every live client.
    ///
    /// Returns the assigned sequence. A transient channel failure is retried
    /// with the shared policy before the message is logged as lost.
    pub async fn publish(
        &self,
        kind: &str,
        data: serde_json::Value,
    ) -> Result<u64, PipelineError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let requires_ack = requires_ack(&data);
        let envelope = Envelope {
            kind: kind.to_string(),
            sequence,
            requires_ack,
            data,
        };

        {
            let mut buffer = self.buffer.lock().unwrap();
            if buffer.len() >= self.config.buffer_size {
                if let Some(evicted) = buffer.pop_front() {
                    // Acks are only tracked within the replay window.
                    self.acks.remove(&evicted.sequence);
                }
            }
            buffer.push_back(envelope.clone());
        }

        if requires_ack {
            self.acks.insert(
                sequence,
                AckRecord {
                    published_at: Utc::now(),
                    acked_by: HashSet::new(),
                },
            );
        }

        let payload =
            serde_json::to_string(&envelope).map_err(PipelineError::serialization)?;
        let publish_result = self
            .retry
            .execute(|_attempt| {
                let store = self.store.clone();
                let payload = payload.clone();
                async move { store.publish(EVENTS_CHANNEL, &payload).await }
            })
            .await;

        match publish_result {
            Ok(()) => {
                self.metrics.broadcast_published();
                Ok(sequence)
            }
            Err(failure) => {
                error!(
                    sequence,
                    kind = %kind,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "broadcast lost after retries"
                );
                Err(failure.error)
            }
        }
    }

    /// Publish a persisted security event.
    pub async fn publish_event(&self, event: &SecurityEvent) -> Result<u64, PipelineError> {
        let data = serde_json::to_value(event).map_err(PipelineError::serialization)?;
        self.publish(notifications::SECURITY_EVENT_NEW, data).await
    }

    /// Buffered messages newer than `last_sequence`, oldest first.
    ///
    /// A gap wider than the buffer is an explicit error — the client must
    /// re-fetch state through the REST layer, never receive silently
    /// truncated history.
    pub fn resync(&self, last_sequence: u64) -> Result<Vec<Envelope>, ResyncError> {
        let buffer = self.buffer.lock().unwrap();
        let current = self.current_sequence();

        if last_sequence >= current {
            return Ok(Vec::new());
        }

        match buffer.front() {
            Some(oldest) if oldest.sequence <= last_sequence + 1 => Ok(buffer
                .iter()
                .filter(|m| m.sequence > last_sequence)
                .cloned()
                .collect()),
            Some(oldest) => Err(ResyncError::CannotReplay {
                last_sequence,
                oldest_available: oldest.sequence,
            }),
            // Messages were published but none survive in the buffer.
            None => Err(ResyncError::CannotReplay {
                last_sequence,
                oldest_available: current + 1,
            }),
        }
    }

    /// Record a client's delivery acknowledgment. Returns `false` when the
    /// sequence is unknown (never required an ack, or already evicted).
    pub fn record_ack(&self, session_id: &SessionId, sequence: u64) -> bool {
        match self.acks.get_mut(&sequence) {
            Some(mut record) => {
                if record.acked_by.insert(session_id.clone()) {
                    self.metrics.broadcast_ack();
                }
                true
            }
            None => false,
        }
    }

    /// Observability view of every tracked `requires_ack` message.
    pub fn ack_snapshot(&self) -> Vec<AckStatus> {
        let mut statuses: Vec<_> = self
            .acks
            .iter()
            .map(|entry| AckStatus {
                sequence: *entry.key(),
                published_at: entry.value().published_at,
                acked_by: entry.value().acked_by.iter().cloned().collect(),
            })
            .collect();
        statuses.sort_by_key(|s| s.sequence);
        statuses
    }

    // Sessions ---------------------------------------------------------------

    /// Register a live client connection and start its keepalive task.
    pub fn register_session(
        self: &Arc<Self>,
        outbound: mpsc::Sender<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<ClientSession> {
        let session = Arc::new(ClientSession::new(outbound, self.metrics.clone()));
        self.sessions.insert(session.id().0, session.clone());
        self.metrics.session_connected();
        info!(session_id = %session.id(), "session registered");

        let broadcaster = Arc::clone(self);
        let keepalive = session.clone();
        tokio::spawn(async move {
            broadcaster.session_keepalive(keepalive, shutdown).await;
        });

        session
    }

    pub fn unregister_session(&self, session_id: &SessionId) {
        if self.sessions.remove(&session_id.0).is_some() {
            self.metrics.session_disconnected();
            info!(session_id = %session_id, "session unregistered");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Ping loop for one session: heartbeats every `ping_interval` with the
    /// session's last relayed sequence, and disconnects the session once it
    /// has been silent past `idle_timeout`.
    async fn session_keepalive(
        self: Arc<Self>,
        session: Arc<ClientSession>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.ping_interval());
        ticker.tick().await; // the first tick fires immediately
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if session.idle_for() >= self.config.idle_timeout() {
                        warn!(session_id = %session.id(), "session idle, disconnecting");
                        self.unregister_session(session.id());
                        return;
                    }
                    if matches!(session.send_ping(), Err(SessionSendError::Closed)) {
                        self.unregister_session(session.id());
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.unregister_session(session.id());
                        return;
                    }
                }
            }
        }
    }

    // Listener ---------------------------------------------------------------

    /// Relay loop: everything the channel delivers goes to every session.
    /// Ends with an error if the subscription dies, which the supervision
    /// loop treats as a crash.
    pub async fn run_listener(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let mut stream = self.store.subscribe(EVENTS_CHANNEL).await?;
        info!(channel = EVENTS_CHANNEL, "broadcast listener subscribed");

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(raw) => self.fan_out(&raw),
                        None => {
                            return Err(PipelineError::Worker {
                                worker: "broadcast-listener".to_string(),
                                message: "channel subscription ended".to_string(),
                            });
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("broadcast listener stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn fan_out(&self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping undecodable channel message");
                return;
            }
        };

        let mut closed: Vec<SessionId> = Vec::new();
        for entry in self.sessions.iter() {
            match entry.value().relay(&envelope) {
                Ok(()) => {}
                Err(SessionSendError::Backpressure) => {
                    debug!(session_id = %entry.value().id(), sequence = envelope.sequence, "frame dropped on backpressure");
                }
                Err(SessionSendError::Closed) => closed.push(entry.value().id().clone()),
            }
        }
        for session_id in closed {
            self.unregister_session(&session_id);
        }
    }

    /// The broadcaster's own supervision, scoped to the channel listener:
    /// restart a dead listener with backoff, bounded attempts.
    pub async fn run_supervised_listener(
        self: Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), PipelineError> {
        let backoff = RetryPolicy::default();
        let mut attempts: u32 = 0;
        loop {
            match self.clone().run_listener(shutdown.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                    attempts += 1;
                    if attempts > self.config.listener_max_restarts {
                        error!(
                            attempts,
                            error = %e,
                            "broadcast listener exceeded its restart budget"
                        );
                        return Err(e);
                    }
                    let delay = backoff.delay_for_attempt(attempts - 1);
                    warn!(
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "broadcast listener died, restarting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// A message needs delivery acknowledgment if it is an event with
/// `risk_score >= 80` or `risk_level == critical`.
fn requires_ack(data: &serde_json::Value) -> bool {
    let score = data.get("risk_score").and_then(|v| v.as_u64()).unwrap_or(0);
    let critical = data.get("risk_level").and_then(|v| v.as_str()) == Some("critical");
    score >= 80 || critical
}
