//! Delivery-log contents after end-to-end runs: one "Data sent" line per
//! successful per-device send and one "Data processed" line per resolved
//! event, in the frozen pipe-delimited format.

mod common;

use bridge::supervisor;
use bridge_test_utils::{MockHubServer, ingress_frame};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn sent_and_processed_lines_match_the_frozen_format() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();

    let config = common::signalr_config(dir.path(), &ingest_hub.url(), &egress_hub.url(), "");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();
    ingest_hub.wait_for_joins(1, Duration::from_secs(5)).await.unwrap();

    let frame = ingress_frame("t1", "GPS001", "GLL001", json!(37.5665));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));
    egress_hub.wait_for_sent(1, Duration::from_secs(5)).await.unwrap();

    // Stopping flushes the sink.
    shutdown_tx.send(true).unwrap();
    stages.stop().await;

    let content = std::fs::read_to_string(common::delivery_log_path(dir.path())).unwrap();
    assert!(
        content.contains(
            "| INFO | Data sent | device_id=VM-A | object=GPS.LAT | value=37.5665"
        ),
        "missing sent line in:\n{content}"
    );
    assert!(
        content.contains(
            "| INFO | Data processed | trace_id=t1 | object=GPS.LAT | target_devices=VM-A"
        ),
        "missing processed line in:\n{content}"
    );
}

#[tokio::test]
async fn one_sent_line_per_device_in_a_fan_out() {
    let dir = tempfile::tempdir().unwrap();
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();

    let config = common::signalr_config(dir.path(), &ingest_hub.url(), &egress_hub.url(), "");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();
    ingest_hub.wait_for_joins(1, Duration::from_secs(5)).await.unwrap();

    let frame = ingress_frame("t3", "ENG001", "RPM001", json!(1420));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));
    egress_hub.wait_for_sent(3, Duration::from_secs(5)).await.unwrap();

    shutdown_tx.send(true).unwrap();
    stages.stop().await;

    let content = std::fs::read_to_string(common::delivery_log_path(dir.path())).unwrap();
    for device in ["VM-A", "VM-B", "VM-C"] {
        assert!(
            content.contains(&format!(
                "Data sent | device_id={device} | object=ENG.RPM | value=1420"
            )),
            "missing line for {device} in:\n{content}"
        );
    }
    assert!(content.contains("target_devices=VM-A,VM-B,VM-C"));

    // Every sent line corresponds to a device of the resolved event
    // (no record for a device outside the fan-out set).
    let stray = content
        .lines()
        .filter(|l| l.contains("Data sent"))
        .filter(|l| !["VM-A", "VM-B", "VM-C"].iter().any(|d| l.contains(&format!("device_id={d}"))))
        .count();
    assert_eq!(stray, 0);
}
