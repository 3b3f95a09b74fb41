//! Broadcaster guarantees: strict sequencing, replay, explicit resync
//! failure, ack tracking and idle disconnection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use argus_application::broadcast::{EventBroadcaster, ResyncError};
use argus_application::metrics::PipelineMetrics;
use argus_infrastructure::MemoryStore;
use argus_shared::config::BroadcastConfig;
use argus_shared::realtime::SessionFrame;

fn broadcaster_with(config: BroadcastConfig) -> Arc<EventBroadcaster> {
    let store = Arc::new(MemoryStore::new());
    Arc::new(EventBroadcaster::new(
        store,
        config,
        PipelineMetrics::new(),
    ))
}

fn small_buffer() -> BroadcastConfig {
    BroadcastConfig {
        buffer_size: 5,
        ..BroadcastConfig::default()
    }
}

async fn next_frame(rx: &mut mpsc::Receiver<String>) -> SessionFrame {
    let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("frame within deadline")
        .expect("channel open");
    serde_json::from_str(&raw).unwrap()
}

#[tokio::test]
async fn sequences_are_strictly_increasing_without_repeats() {
    let broadcaster = broadcaster_with(BroadcastConfig::default());
    let mut last = 0;
    for n in 0..50 {
        let seq = broadcaster
            .publish("detection.new", serde_json::json!({ "n": n }))
            .await
            .unwrap();
        assert!(seq > last, "sequence must strictly increase");
        last = seq;
    }
    assert_eq!(broadcaster.current_sequence(), 50);
}

#[tokio::test]
async fn listener_relays_published_messages_to_sessions_in_order() {
    let broadcaster = broadcaster_with(BroadcastConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let listener = tokio::spawn(broadcaster.clone().run_listener(shutdown_rx.clone()));
    tokio::time::sleep(Duration::from_millis(20)).await; // let it subscribe

    let (tx, mut rx) = mpsc::channel(32);
    let session = broadcaster.register_session(tx, shutdown_rx);
    assert_eq!(broadcaster.session_count(), 1);

    for n in 1..=3 {
        broadcaster
            .publish("detection.new", serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }

    for expected in 1..=3u64 {
        match next_frame(&mut rx).await {
            SessionFrame::Relay { seq, message } => {
                assert_eq!(seq, expected);
                assert_eq!(message.sequence, expected);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    assert_eq!(session.last_relayed_sequence(), 3);

    shutdown_tx.send(true).unwrap();
    listener.await.unwrap().unwrap();
}

#[tokio::test]
async fn resync_inside_the_window_returns_exactly_the_missed_messages() {
    let broadcaster = broadcaster_with(small_buffer());
    for n in 1..=8 {
        broadcaster
            .publish("detection.new", serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }

    // Buffer holds 4..=8. A client at 3 gets everything it missed.
    let missed = broadcaster.resync(3).unwrap();
    let sequences: Vec<u64> = missed.iter().map(|m| m.sequence).collect();
    assert_eq!(sequences, vec![4, 5, 6, 7, 8]);

    // A caught-up client gets nothing.
    assert!(broadcaster.resync(8).unwrap().is_empty());
}

#[tokio::test]
async fn resync_beyond_the_window_fails_explicitly() {
    let broadcaster = broadcaster_with(small_buffer());
    for n in 1..=8 {
        broadcaster
            .publish("detection.new", serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }

    let err = broadcaster.resync(1).unwrap_err();
    match err {
        ResyncError::CannotReplay {
            last_sequence,
            oldest_available,
        } => {
            assert_eq!(last_sequence, 1);
            assert_eq!(oldest_available, 4);
        }
    }
}

#[tokio::test]
async fn resync_request_over_the_wire_gets_an_explicit_failure_frame() {
    let broadcaster = broadcaster_with(small_buffer());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(32);
    let session = broadcaster.register_session(tx, shutdown_rx);

    for n in 1..=8 {
        broadcaster
            .publish("detection.new", serde_json::json!({ "n": n }))
            .await
            .unwrap();
    }

    let request = r#"{"type":"resync","data":{"channel":"argus.events","last_sequence":0}}"#;
    session.handle_client_text(request, &broadcaster).unwrap();

    match next_frame(&mut rx).await {
        SessionFrame::ResyncFailed {
            oldest_available, ..
        } => assert_eq!(oldest_available, 4),
        other => panic!("unexpected frame: {other:?}"),
    }

    // Within the window the same request replays in order.
    let request = r#"{"type":"resync","data":{"channel":"argus.events","last_sequence":5}}"#;
    session.handle_client_text(request, &broadcaster).unwrap();
    match next_frame(&mut rx).await {
        SessionFrame::Resync { messages, .. } => {
            let sequences: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
            assert_eq!(sequences, vec![6, 7, 8]);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn high_risk_events_track_acks_per_session() {
    let broadcaster = broadcaster_with(BroadcastConfig::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, _rx) = mpsc::channel(32);
    let session = broadcaster.register_session(tx, shutdown_rx);

    let seq = broadcaster
        .publish(
            "security_event.new",
            serde_json::json!({ "risk_score": 91, "risk_level": "high" }),
        )
        .await
        .unwrap();
    let low = broadcaster
        .publish(
            "security_event.new",
            serde_json::json!({ "risk_score": 12, "risk_level": "low" }),
        )
        .await
        .unwrap();

    let ack = format!(r#"{{"type":"ack","sequence":{seq}}}"#);
    session.handle_client_text(&ack, &broadcaster).unwrap();

    let snapshot = broadcaster.ack_snapshot();
    assert_eq!(snapshot.len(), 1, "only requires_ack messages are tracked");
    assert_eq!(snapshot[0].sequence, seq);
    assert_eq!(snapshot[0].acked_by, vec![session.id().clone()]);

    // Low-risk sequences are not tracked at all.
    assert!(!broadcaster.record_ack(session.id(), low));
}

#[tokio::test]
async fn silent_sessions_are_disconnected_after_the_idle_timeout() {
    let config = BroadcastConfig {
        ping_interval_secs: 1,
        idle_timeout_secs: 2,
        ..BroadcastConfig::default()
    };
    let broadcaster = broadcaster_with(config);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let (tx, mut rx) = mpsc::channel(32);
    let _session = broadcaster.register_session(tx, shutdown_rx);
    assert_eq!(broadcaster.session_count(), 1);

    // The first heartbeat arrives while the session is still live.
    match next_frame(&mut rx).await {
        SessionFrame::Ping { last_sequence, .. } => assert_eq!(last_sequence, 0),
        other => panic!("unexpected frame: {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(2_500)).await;
    assert_eq!(broadcaster.session_count(), 0);
}
