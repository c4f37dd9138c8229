// bridge-test-utils: Shared test utilities for the bridge suite.
//
// Provides an in-process mock hub server speaking the minimal SignalR JSON
// protocol, plus ingress-frame builders, for integration testing of the
// ingest and egress clients without an external broker.

pub mod mock_hub_server;

pub use mock_hub_server::{JoinRecord, MockHubServer, SentMessage};

use serde_json::{Value, json};

/// Build a well-formed ingress frame.
pub fn ingress_frame(uuid: &str, equip_tag: &str, message_id: &str, value: Value) -> Value {
    json!({
        "header": {"UUID": uuid},
        "payload": {"Equip.Tag": equip_tag, "Message.ID": message_id, "VALUE": value}
    })
}

/// Build an ingress frame with no header UUID (trace id must be generated).
pub fn anonymous_frame(equip_tag: &str, message_id: &str, value: Value) -> Value {
    json!({
        "header": {},
        "payload": {"Equip.Tag": equip_tag, "Message.ID": message_id, "VALUE": value}
    })
}
