//! Minimal SignalR JSON hub protocol codec.
//!
//! Hub traffic is a stream of JSON records separated by the ASCII record
//! separator (0x1E). The first exchange on a connection is the handshake:
//!
//! ```text
//! client -> {"protocol":"json","version":1}\x1e
//! server -> {}\x1e
//! ```
//!
//! After the handshake, each record carries a numeric `type` field:
//! 1 = invocation, 6 = ping, 7 = close. The bridge only sends fire-and-forget
//! invocations (no `invocationId`), matching the hub methods it calls
//! (`JoinGroup`, `LeaveGroup`, `SendMessage`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Record separator terminating every hub record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const TYPE_INVOCATION: u64 = 1;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Client handshake record (sent before anything else).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        HandshakeRequest { protocol: "json".to_owned(), version: 1 }
    }
}

/// Server handshake response; an `error` field means the server refused
/// the requested protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Post-handshake records
// ---------------------------------------------------------------------------

/// A hub method invocation (`type: 1`), in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub target: String,
    pub arguments: Vec<Value>,
    #[serde(rename = "invocationId", default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
}

/// One decoded hub record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(Invocation),
    Ping,
    Close { error: Option<String> },
    /// A record type the bridge does not handle (completions, stream items).
    Other(u64),
}

#[derive(Debug)]
pub enum HubDecodeError {
    Json(serde_json::Error),
    MissingType,
}

impl std::fmt::Display for HubDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubDecodeError::Json(e) => write!(f, "hub record JSON error: {e}"),
            HubDecodeError::MissingType => write!(f, "hub record has no numeric `type` field"),
        }
    }
}

impl std::error::Error for HubDecodeError {}

impl From<serde_json::Error> for HubDecodeError {
    fn from(e: serde_json::Error) -> Self {
        HubDecodeError::Json(e)
    }
}

// ---------------------------------------------------------------------------
// Encoding / decoding
// ---------------------------------------------------------------------------

/// Serialize a record and append the separator.
pub fn encode_record<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    let mut text = serde_json::to_string(record)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Encode a fire-and-forget invocation record.
pub fn encode_invocation(target: &str, arguments: Vec<Value>) -> Result<String, serde_json::Error> {
    let record = serde_json::json!({
        "type": TYPE_INVOCATION,
        "target": target,
        "arguments": arguments,
    });
    encode_record(&record)
}

/// Encode a ping record.
pub fn encode_ping() -> String {
    format!("{{\"type\":{TYPE_PING}}}{RECORD_SEPARATOR}")
}

/// Split one WebSocket text message into its complete hub records.
///
/// Hub servers never split a record across WebSocket messages, so a plain
/// separator split (dropping the trailing empty segment) is sufficient.
pub fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR).filter(|r| !r.is_empty())
}

/// Decode one post-handshake record.
pub fn decode_message(record: &str) -> Result<HubMessage, HubDecodeError> {
    let value: Value = serde_json::from_str(record)?;
    let kind = value.get("type").and_then(Value::as_u64).ok_or(HubDecodeError::MissingType)?;
    Ok(match kind {
        TYPE_INVOCATION => HubMessage::Invocation(serde_json::from_value(value)?),
        TYPE_PING => HubMessage::Ping,
        TYPE_CLOSE => HubMessage::Close {
            error: value.get("error").and_then(Value::as_str).map(str::to_owned),
        },
        other => HubMessage::Other(other),
    })
}

/// Decode the server's handshake response record.
pub fn decode_handshake(record: &str) -> Result<HandshakeResponse, serde_json::Error> {
    serde_json::from_str(record)
}
