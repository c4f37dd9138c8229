//! SignalR hub connection used by both the ingest and egress clients.
//!
//! # Protocol
//! 1. Connect the WebSocket (http/https URLs are rewritten to ws/wss)
//! 2. Send the JSON-protocol handshake record, read the server's response
//! 3. Exchange 0x1E-delimited records: fire-and-forget invocations out,
//!    invocations/pings/closes in
//!
//! The connection is owned by exactly one client task; all reentrancy
//! concerns are handled by that ownership, not by locks.

use bridge_protocol::hub::{
    HandshakeRequest, HubMessage, Invocation, decode_handshake, decode_message,
    encode_invocation, encode_record, split_records,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Connection error: {0}")]
    Connect(String),
    #[error("WebSocket error: {0}")]
    Ws(String),
    #[error("Handshake rejected: {0}")]
    Handshake(String),
    #[error("Codec error: {0}")]
    Codec(String),
}

/// What `next_event` yields once connected.
#[derive(Debug)]
pub enum HubEvent {
    Invocation(Invocation),
    /// Hub-level close record or WebSocket close; the connection is gone.
    Closed { error: Option<String> },
}

pub struct HubConnection {
    ws: WsStream,
    /// Invocations decoded but not yet handed to the caller (a single
    /// WebSocket message may carry several records).
    pending: VecDeque<Invocation>,
}

impl HubConnection {
    /// Connect and complete the JSON-protocol handshake.
    pub async fn connect(url: &str) -> Result<Self, HubError> {
        use tokio_tungstenite::connect_async;

        let ws_url = to_ws_url(url)?;
        let (ws, _response) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| HubError::Connect(e.to_string()))?;

        let mut conn = HubConnection { ws, pending: VecDeque::new() };

        let handshake =
            encode_record(&HandshakeRequest::default()).map_err(|e| HubError::Codec(e.to_string()))?;
        conn.ws
            .send(Message::Text(handshake.into()))
            .await
            .map_err(|e| HubError::Ws(e.to_string()))?;

        conn.read_handshake_response().await?;
        Ok(conn)
    }

    /// Send a fire-and-forget invocation.
    pub async fn invoke(&mut self, target: &str, arguments: Vec<Value>) -> Result<(), HubError> {
        let record =
            encode_invocation(target, arguments).map_err(|e| HubError::Codec(e.to_string()))?;
        self.ws
            .send(Message::Text(record.into()))
            .await
            .map_err(|e| HubError::Ws(e.to_string()))
    }

    /// The next inbound invocation or the connection's end.
    ///
    /// Pings (hub and WebSocket level) are answered internally; record types
    /// the bridge does not handle are skipped.
    pub async fn next_event(&mut self) -> Result<HubEvent, HubError> {
        loop {
            if let Some(invocation) = self.pending.pop_front() {
                return Ok(HubEvent::Invocation(invocation));
            }
            match self.ws.next().await {
                None => return Ok(HubEvent::Closed { error: None }),
                Some(Err(e)) => return Err(HubError::Ws(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    if let Some(closed) = self.ingest_records(&text)? {
                        return Ok(closed);
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => return Ok(HubEvent::Closed { error: None }),
                Some(Ok(_)) => {}
            }
        }
    }

    /// Best-effort close of the underlying socket.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    async fn read_handshake_response(&mut self) -> Result<(), HubError> {
        loop {
            match self.ws.next().await {
                None => return Err(HubError::Connect("closed during handshake".to_owned())),
                Some(Err(e)) => return Err(HubError::Ws(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    let mut records = split_records(&text);
                    let first = records
                        .next()
                        .ok_or_else(|| HubError::Handshake("empty handshake frame".to_owned()))?;
                    let response =
                        decode_handshake(first).map_err(|e| HubError::Codec(e.to_string()))?;
                    if let Some(error) = response.error {
                        return Err(HubError::Handshake(error));
                    }
                    // The server may have coalesced early records behind the
                    // handshake response; keep them for next_event.
                    for record in records {
                        if let HubMessage::Invocation(inv) =
                            decode_message(record).map_err(|e| HubError::Codec(e.to_string()))?
                        {
                            self.pending.push_back(inv);
                        }
                    }
                    return Ok(());
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) => {
                    return Err(HubError::Connect("closed during handshake".to_owned()));
                }
                Some(Ok(_)) => {}
            }
        }
    }

    /// Decode every record in one WebSocket message; returns the close event
    /// if one is present.
    fn ingest_records(&mut self, text: &str) -> Result<Option<HubEvent>, HubError> {
        for record in split_records(text) {
            match decode_message(record).map_err(|e| HubError::Codec(e.to_string()))? {
                HubMessage::Invocation(inv) => self.pending.push_back(inv),
                HubMessage::Ping => {
                    // Server keepalive; no reply required on the JSON protocol.
                }
                HubMessage::Close { error } => return Ok(Some(HubEvent::Closed { error })),
                HubMessage::Other(kind) => {
                    tracing::debug!(kind, "ignoring unhandled hub record type");
                }
            }
        }
        Ok(None)
    }
}

/// Rewrite an http(s) hub URL to its ws(s) form; ws(s) passes through.
fn to_ws_url(url: &str) -> Result<String, HubError> {
    if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_owned())
    } else {
        Err(HubError::Connect(format!("unsupported hub URL scheme: '{url}'")))
    }
}
