//! End-to-end pipeline harness over two in-process mock hubs.
//!
//! A frame published into the ingest hub's group must come out of the
//! egress hub as a `SendMessage(device, target, payload)` invocation, with
//! mapping, coercion, and fan-out applied in between. No external broker is
//! involved; both hubs run in the test process.

mod common;

use bridge::supervisor;
use bridge_protocol::{CoercedValue, EgressPayload};
use bridge_test_utils::{MockHubServer, ingress_frame};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;

/// Start both hubs and the full stage set; returns everything the tests
/// poke at.
async fn start_bridge(
    dir: &std::path::Path,
    pipeline_extra: &str,
) -> (MockHubServer, MockHubServer, supervisor::Stages, watch::Sender<bool>) {
    let ingest_hub = MockHubServer::start().await.unwrap();
    let egress_hub = MockHubServer::start().await.unwrap();
    let config = common::signalr_config(dir, &ingest_hub.url(), &egress_hub.url(), pipeline_extra);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = supervisor::start(&config, shutdown_rx).unwrap();
    // The ingest client must be joined before frames are published.
    ingest_hub.wait_for_joins(1, Duration::from_secs(5)).await.unwrap();
    (ingest_hub, egress_hub, stages, shutdown_tx)
}

fn parse_payload(sent: &bridge_test_utils::SentMessage) -> EgressPayload {
    let text = sent.payload.as_str().expect("payload argument is a JSON string");
    serde_json::from_str(text).expect("payload parses as an egress frame")
}

#[tokio::test]
async fn single_device_float_frame_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    let frame = ingress_frame("t1", "GPS001", "GLL001", json!(37.5665));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));

    let sent = egress_hub.wait_for_sent(1, Duration::from_secs(5)).await.unwrap();
    assert_eq!(sent[0].method, "SendMessage");
    assert_eq!(sent[0].group, "VM-A");
    assert_eq!(sent[0].target, "ingress");

    let payload = parse_payload(&sent[0]);
    assert_eq!(payload.object, "GPS.LAT");
    assert_eq!(payload.value, CoercedValue::Float(37.5665));
    assert_eq!(payload.trace_id.as_deref(), Some("t1"));
    assert!(payload.timestamp.ends_with('Z'));

    let snap = stages.counters.snapshot();
    assert_eq!(snap.ingested, 1);
    assert_eq!(snap.sent, 1);
    assert_eq!(snap.send_failed, 0);

    shutdown.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn string_value_coerces_to_the_declared_float() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    // Same as the numeric case, but VALUE arrives as a string.
    let frame = ingress_frame("t2", "GPS001", "GLL001", json!("37.5665"));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));

    let sent = egress_hub.wait_for_sent(1, Duration::from_secs(5)).await.unwrap();
    let payload = parse_payload(&sent[0]);
    assert_eq!(payload.value, CoercedValue::Float(37.5665));

    shutdown.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn multi_device_fan_out_follows_catalog_order() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    let frame = ingress_frame("t3", "ENG001", "RPM001", json!(1420));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));

    let sent = egress_hub.wait_for_sent(3, Duration::from_secs(5)).await.unwrap();
    let groups: Vec<&str> = sent.iter().map(|s| s.group.as_str()).collect();
    assert_eq!(groups, ["VM-A", "VM-B", "VM-C"]);
    for message in &sent {
        let payload = parse_payload(message);
        assert_eq!(payload.object, "ENG.RPM");
        assert_eq!(payload.value, CoercedValue::Integer(1420));
        assert_eq!(payload.trace_id.as_deref(), Some("t3"));
    }
    assert_eq!(stages.counters.snapshot().sent, 3);

    shutdown.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn all_three_frame_argument_shapes_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    let frame = ingress_frame("t4", "GPS001", "GLL001", json!(1.0));
    // Shape 1: JSON-encoded string.
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));
    // Shape 2: list whose first element is such a string.
    ingest_hub.publish("gateways", "ingress", json!([frame.to_string()]));
    // Shape 3: already-decoded object.
    ingest_hub.publish("gateways", "ingress", frame);

    let sent = egress_hub.wait_for_sent(3, Duration::from_secs(5)).await.unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(stages.counters.snapshot().ingested, 3);

    shutdown.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn invalid_and_unmapped_frames_have_no_downstream_effect() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    // Equip.Tag absent.
    let missing_tag = json!({"header": {}, "payload": {"Message.ID": "GLL001", "VALUE": 1.0}});
    ingest_hub.publish("gateways", "ingress", json!(missing_tag.to_string()));
    // Unknown (equip_tag, message_id) pair.
    let unmapped = ingress_frame("t5", "UNKNOWN", "X", json!(1));
    ingest_hub.publish("gateways", "ingress", json!(unmapped.to_string()));
    // Mapped object with an empty device set.
    let unrouted = ingress_frame("t6", "AUX001", "AUX001", json!(2.5));
    ingest_hub.publish("gateways", "ingress", json!(unrouted.to_string()));

    // Give the pipeline time to chew through all three.
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(egress_hub.sent().is_empty(), "no send may reach any device");
    let snap = stages.counters.snapshot();
    assert_eq!(snap.ingested, 3);
    assert_eq!(snap.invalid_payload, 1);
    assert_eq!(snap.unmapped, 1);
    assert_eq!(snap.no_targets, 1);
    assert_eq!(snap.sent, 0);

    shutdown.send(true).unwrap();
    stages.stop().await;
}

#[tokio::test]
async fn frames_without_header_uuid_get_generated_trace_ids() {
    let dir = tempfile::tempdir().unwrap();
    let (ingest_hub, egress_hub, stages, shutdown) = start_bridge(dir.path(), "").await;

    let frame = bridge_test_utils::anonymous_frame("GPS001", "GLL001", json!(5.0));
    ingest_hub.publish("gateways", "ingress", json!(frame.to_string()));

    let sent = egress_hub.wait_for_sent(1, Duration::from_secs(5)).await.unwrap();
    let payload = parse_payload(&sent[0]);
    let trace_id = payload.trace_id.expect("trace id always present");
    assert!(uuid::Uuid::parse_str(&trace_id).is_ok(), "generated trace id is a UUID");

    shutdown.send(true).unwrap();
    stages.stop().await;
}
