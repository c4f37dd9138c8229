//! Reconnection behavior under an unhealthy peer: backoff growth while the
//! hub refuses connections, idle-watchdog recovery when the peer goes
//! silent, and egress recovery after a hub restart.
//!
//! Timing assertions carry wide tolerances; they check the shape of the
//! schedule, not exact offsets.

mod common;

use bridge::supervisor;
use bridge_test_utils::{MockHubServer, ingress_frame};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn ingest_backoff_delays_grow_while_hub_refuses() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();
    ingest_hub.set_reject_connections(true);

    let config = common::signalr_config(dir.path(), &ingest_hub.url(), &egress_hub.url(), "");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();

    // Nominal dials at 0, 1, 3 (1 s then 2 s gap); observe for ~4 s.
    tokio::time::sleep(Duration::from_millis(3800)).await;
    let attempts = ingest_hub.attempt_times();
    assert!(
        (2..=5).contains(&attempts.len()),
        "expected a handful of backoff-paced dials, saw {}",
        attempts.len()
    );
    let gaps: Vec<Duration> =
        attempts.windows(2).map(|w| w[1].duration_since(w[0])).collect();
    for pair in gaps.windows(2) {
        assert!(
            pair[1] + Duration::from_millis(200) >= pair[0],
            "backoff gaps must be non-decreasing: {gaps:?}"
        );
    }

    // Once the hub accepts again, the client joins and the schedule resets.
    ingest_hub.set_reject_connections(false);
    ingest_hub.wait_for_joins(1, Duration::from_secs(10)).await.unwrap();

    shutdown_tx.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn ingest_idle_watchdog_forces_rejoin() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();

    // Hub accepts and joins but never delivers a frame.
    let config = common::signalr_config(
        dir.path(),
        &ingest_hub.url(),
        &egress_hub.url(),
        "ingest_idle_timeout_seconds = 1",
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();

    // Each cycle: join, starve for 1 s, back off 1 s, rejoin.
    let joins = ingest_hub.wait_for_joins(2, Duration::from_secs(6)).await.unwrap();
    assert!(joins.len() >= 2, "idle watchdog must force a reconnect");
    assert!(
        joins[1].at.duration_since(joins[0].at) >= Duration::from_millis(900),
        "rejoin must wait out the idle window"
    );

    shutdown_tx.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn egress_recovers_after_hub_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();

    let config = common::signalr_config(dir.path(), &ingest_hub.url(), &egress_hub.url(), "");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();
    ingest_hub.wait_for_joins(1, Duration::from_secs(5)).await.unwrap();

    // Healthy delivery first.
    let frame = ingress_frame("c1", "GPS001", "GLL001", json!(1.0));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));
    egress_hub.wait_for_sent(1, Duration::from_secs(5)).await.unwrap();

    // Kill every egress connection, then push another frame through.
    egress_hub.drop_connections();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let frame = ingress_frame("c2", "GPS001", "GLL001", json!(2.0));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));

    // Either the maintenance path redials first or the per-send forced
    // reconnect does; both end in delivery.
    let sent = egress_hub.wait_for_sent(2, Duration::from_secs(10)).await.unwrap();
    assert_eq!(sent.len(), 2);
    let payload: bridge_protocol::EgressPayload =
        serde_json::from_str(sent[1].payload.as_str().unwrap()).unwrap();
    assert_eq!(payload.trace_id.as_deref(), Some("c2"));

    shutdown_tx.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn shutdown_is_bounded_and_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();

    let config = common::signalr_config(dir.path(), &ingest_hub.url(), &egress_hub.url(), "");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();
    ingest_hub.wait_for_joins(1, Duration::from_secs(5)).await.unwrap();

    // Double signal, then the whole stop sequence must finish well inside
    // the per-stage bound.
    shutdown_tx.send(true).unwrap();
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), stages.stop())
        .await
        .expect("stages must stop within their bounds");
}
