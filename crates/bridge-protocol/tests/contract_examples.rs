/// Contract tests for the two frozen wire frames: the upstream ingress frame
/// and the downstream egress frame. Each example is deserialized, serialized
/// back, and compared structurally so field renames or tag changes fail here
/// before they break a peer.
use bridge_protocol::{CoercedValue, EgressPayload, payload_fields};

/// Helper: assert a JSON document survives an EgressPayload round-trip.
fn round_trip_egress(json_text: &str) -> EgressPayload {
    let payload: EgressPayload =
        serde_json::from_str(json_text).expect("example must deserialize");
    let serialized = serde_json::to_string(&payload).expect("must serialize");
    let original: serde_json::Value = serde_json::from_str(json_text).unwrap();
    let round_tripped: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    assert_eq!(original, round_tripped, "egress frame round-trip mismatch");
    payload
}

#[test]
fn ingress_frame_example_projects_all_three_fields() {
    let frame: serde_json::Value = serde_json::from_str(
        r#"{
            "header": {"UUID": "t1", "Route": "gw-7"},
            "payload": {"Equip.Tag": "GPS001", "Message.ID": "GLL001", "VALUE": 37.5665}
        }"#,
    )
    .unwrap();

    let (equip_tag, message_id, value) = payload_fields(&frame).expect("frame is complete");
    assert_eq!(equip_tag, "GPS001");
    assert_eq!(message_id, "GLL001");
    assert_eq!(value.as_f64(), Some(37.5665));
    assert_eq!(bridge_protocol::header_uuid(&frame), Some("t1"));
}

#[test]
fn ingress_frame_tolerates_arbitrary_header_fields() {
    // Gateways attach routing metadata the bridge must ignore, not reject.
    let frame: serde_json::Value = serde_json::from_str(
        r#"{
            "header": {"Site": "plant-3", "Hops": 2},
            "payload": {"Equip.Tag": "ENG001", "Message.ID": "RPM001", "VALUE": "1420"}
        }"#,
    )
    .unwrap();
    assert!(payload_fields(&frame).is_some());
    assert_eq!(bridge_protocol::header_uuid(&frame), None);
}

#[test]
fn egress_frame_round_trip_with_trace_id() {
    let payload = round_trip_egress(
        r#"{
            "object": "GPS.LAT",
            "value": 37.5665,
            "timestamp": "2026-08-01T09:30:00.123Z",
            "trace_id": "t1"
        }"#,
    );
    assert_eq!(payload.object, "GPS.LAT");
    assert_eq!(payload.value, CoercedValue::Float(37.5665));
    assert_eq!(payload.trace_id.as_deref(), Some("t1"));
}

#[test]
fn egress_frame_round_trip_without_trace_id() {
    // trace_id is optional on the wire and must not serialize as null.
    let payload = round_trip_egress(
        r#"{
            "object": "ENG.RPM",
            "value": 1420,
            "timestamp": "2026-08-01T09:30:00.000Z"
        }"#,
    );
    assert!(payload.trace_id.is_none());
    assert_eq!(payload.value, CoercedValue::Integer(1420));
}

#[test]
fn egress_frame_has_no_addressing_fields() {
    // The device id lives in the topic/group, never in the body.
    let event = bridge_protocol::ResolvedEvent {
        trace_id: "t1".to_owned(),
        object: "GPS.LAT".to_owned(),
        value: CoercedValue::Float(37.5665),
        devices: vec!["VM-A".to_owned()],
    };
    let body = serde_json::to_value(EgressPayload::from_event(&event)).unwrap();
    let mut keys: Vec<&str> = body.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, ["object", "timestamp", "trace_id", "value"]);
}

#[test]
fn egress_frame_carries_each_scalar_kind() {
    for (value_json, expected) in [
        ("42", CoercedValue::Integer(42)),
        ("3.25", CoercedValue::Float(3.25)),
        ("\"idle\"", CoercedValue::Text("idle".to_owned())),
        ("true", CoercedValue::Boolean(true)),
    ] {
        let text = format!(
            r#"{{"object": "X", "value": {value_json}, "timestamp": "2026-08-01T00:00:00.000Z"}}"#
        );
        let payload = round_trip_egress(&text);
        assert_eq!(payload.value, expected);
    }
}
