// bridge-protocol: Pipeline event types and wire frames for the data bridge.
//
// Events move through the pipeline by value (Ingress -> Mapped -> Resolved ->
// Delivery); once a stage hands an event on, it holds no reference to it.
// The inbound frame body stays a dynamic `serde_json::Value` because gateways
// attach arbitrary header fields -- only `payload.{Equip.Tag, Message.ID,
// VALUE}` and `header.UUID` are recognized, via the projection helpers below.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod hub;

// ---------------------------------------------------------------------------
// Transport and value-type vocabulary
// ---------------------------------------------------------------------------

/// The two transport dialects the bridge speaks, on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Mqtt,
    Signalr,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Mqtt => write!(f, "mqtt"),
            TransportKind::Signalr => write!(f, "signalr"),
        }
    }
}

/// Declared value type of a mapping rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Integer => write!(f, "integer"),
            ValueType::Float => write!(f, "float"),
            ValueType::Text => write!(f, "text"),
            ValueType::Boolean => write!(f, "boolean"),
        }
    }
}

/// A telemetry value after coercion to its rule's declared type.
///
/// Serializes as a bare JSON scalar, so it can be embedded directly in the
/// egress frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoercedValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl CoercedValue {
    pub fn type_of(&self) -> ValueType {
        match self {
            CoercedValue::Integer(_) => ValueType::Integer,
            CoercedValue::Float(_) => ValueType::Float,
            CoercedValue::Text(_) => ValueType::Text,
            CoercedValue::Boolean(_) => ValueType::Boolean,
        }
    }
}

/// Natural textual form, used for the `value=` field of delivery-log lines.
impl std::fmt::Display for CoercedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoercedValue::Integer(i) => write!(f, "{i}"),
            CoercedValue::Float(x) => write!(f, "{x}"),
            CoercedValue::Text(s) => write!(f, "{s}"),
            CoercedValue::Boolean(b) => write!(f, "{b}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline events
// ---------------------------------------------------------------------------

/// Receive-side metadata attached to every ingress event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressMeta {
    pub source: TransportKind,
    /// The subscription address the frame arrived on (topic or group).
    pub address: String,
    pub received_at: DateTime<Utc>,
}

/// One inbound frame, decoded but not yet interpreted.
///
/// `trace_id` comes from `header.UUID` when the gateway supplies one,
/// otherwise it is freshly generated on receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngressEvent {
    pub trace_id: String,
    pub raw: Value,
    pub meta: IngressMeta,
}

impl IngressEvent {
    /// Wrap a decoded frame, taking the trace id from `header.UUID` if
    /// present and non-empty.
    pub fn from_frame(raw: Value, meta: IngressMeta) -> Self {
        let trace_id = header_uuid(&raw)
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        IngressEvent { trace_id, raw, meta }
    }
}

/// Output of the mapping stage: the canonical (object, value) tuple.
///
/// Invariant: `value.type_of() == value_type`, which equals the matched
/// rule's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedEvent {
    pub trace_id: String,
    pub object: String,
    pub value: CoercedValue,
    pub value_type: ValueType,
}

/// Output of the resolution stage.
///
/// Invariant: `devices` is non-empty and is exactly the device catalog's
/// list for `object`, order (and duplicates) preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub trace_id: String,
    pub object: String,
    pub value: CoercedValue,
    pub devices: Vec<String>,
}

/// One successful per-device send, as recorded in the delivery log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub trace_id: String,
    pub device_id: String,
    pub object: String,
    pub value: CoercedValue,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Downstream egress frame
// ---------------------------------------------------------------------------

/// The JSON document published to a device.
///
/// The device id is addressing, not content: it selects the MQTT topic
/// (`devices/<device_id_lowercase>/ingress`) or the hub group of a
/// `SendMessage(group, target, payload)` invocation, and never appears in
/// the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressPayload {
    pub object: String,
    pub value: CoercedValue,
    /// ISO-8601 UTC with millisecond precision.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl EgressPayload {
    /// Build the payload for one resolved event, stamped now.
    pub fn from_event(event: &ResolvedEvent) -> Self {
        EgressPayload {
            object: event.object.clone(),
            value: event.value.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            trace_id: Some(event.trace_id.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame projection helpers
// ---------------------------------------------------------------------------

/// `header.UUID`, if present, a string, and non-empty.
pub fn header_uuid(raw: &Value) -> Option<&str> {
    raw.get("header")?
        .get("UUID")?
        .as_str()
        .filter(|s| !s.is_empty())
}

/// The three mandatory payload fields: `Equip.Tag`, `Message.ID`, `VALUE`.
///
/// Returns `None` when any is absent, the tags are not strings, or `VALUE`
/// is JSON null (the distinguished "absent" scalar).
pub fn payload_fields(raw: &Value) -> Option<(&str, &str, &Value)> {
    let payload = raw.get("payload")?;
    let equip_tag = payload.get("Equip.Tag")?.as_str()?;
    let message_id = payload.get("Message.ID")?.as_str()?;
    let value = payload.get("VALUE")?;
    if value.is_null() {
        return None;
    }
    Some((equip_tag, message_id, value))
}
