// mock_hub_server: A mock SignalR-style hub for testing the bridge clients.
//
// Accepts connections on ws://localhost:<port>, answers the JSON-protocol
// handshake, tracks JoinGroup/LeaveGroup membership, records every
// three-argument invocation (SendMessage and variants) for assertions, and
// lets tests publish invocations into a group.

use bridge_protocol::hub::{HubMessage, decode_message, split_records};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// One captured three-argument invocation (`SendMessage(group, target,
/// payload)` or a renamed equivalent).
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub method: String,
    pub group: String,
    pub target: String,
    pub payload: Value,
    pub received_at: Instant,
}

/// One observed `JoinGroup` invocation.
#[derive(Debug, Clone)]
pub struct JoinRecord {
    pub group: String,
    pub at: Instant,
}

#[derive(Default)]
struct HubState {
    next_conn_id: u64,
    conns: HashMap<u64, mpsc::UnboundedSender<Message>>,
    groups: HashMap<String, Vec<u64>>,
    sent: Vec<SentMessage>,
    joins: Vec<JoinRecord>,
    /// Timestamps of accepted TCP connections (including rejected upgrades).
    attempts: Vec<Instant>,
    reject_connections: bool,
}

/// A mock hub server for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Each test can
/// spin up its own isolated instance.
pub struct MockHubServer {
    addr: SocketAddr,
    state: Arc<Mutex<HubState>>,
    /// Handle to the background accept loop; dropped with the server.
    _task: tokio::task::JoinHandle<()>,
}

impl MockHubServer {
    /// Start the mock hub, binding to a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(HubState::default()));

        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            accept_loop(listener, accept_state).await;
        });

        Ok(Self { addr, state, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Hub URL for client config.
    pub fn url(&self) -> String {
        format!("ws://{}/hub", self.addr)
    }

    /// When set, accepted TCP connections are dropped before the WebSocket
    /// upgrade, so clients observe connect failures.
    pub fn set_reject_connections(&self, reject: bool) {
        self.state.lock().unwrap().reject_connections = reject;
    }

    /// Deliver an invocation of `target` carrying `argument` to every
    /// member of `group`.
    pub fn publish(&self, group: &str, target: &str, argument: Value) {
        let record = format!(
            "{}{}",
            json!({"type": 1, "target": target, "arguments": [argument]}),
            '\u{1e}'
        );
        let state = self.state.lock().unwrap();
        if let Some(members) = state.groups.get(group) {
            for conn_id in members {
                if let Some(tx) = state.conns.get(conn_id) {
                    let _ = tx.send(Message::Text(record.clone().into()));
                }
            }
        }
    }

    /// Close every open connection (simulates a hub restart).
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        state.conns.clear();
        state.groups.clear();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn joins(&self) -> Vec<JoinRecord> {
        self.state.lock().unwrap().joins.clone()
    }

    pub fn connection_attempts(&self) -> usize {
        self.state.lock().unwrap().attempts.len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    /// Poll until at least `n` sends were captured or the deadline passes.
    pub async fn wait_for_sent(
        &self,
        n: usize,
        limit: Duration,
    ) -> Result<Vec<SentMessage>, String> {
        let deadline = Instant::now() + limit;
        loop {
            let sent = self.sent();
            if sent.len() >= n {
                return Ok(sent);
            }
            if Instant::now() >= deadline {
                return Err(format!("expected {n} sends, saw {} within {limit:?}", sent.len()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until at least `n` group joins were observed.
    pub async fn wait_for_joins(&self, n: usize, limit: Duration) -> Result<Vec<JoinRecord>, String> {
        let deadline = Instant::now() + limit;
        loop {
            let joins = self.joins();
            if joins.len() >= n {
                return Ok(joins);
            }
            if Instant::now() >= deadline {
                return Err(format!("expected {n} joins, saw {} within {limit:?}", joins.len()));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<HubState>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let reject = {
                    let mut s = state.lock().unwrap();
                    s.attempts.push(Instant::now());
                    s.reject_connections
                };
                if reject {
                    drop(stream);
                    continue;
                }
                let conn_state = state.clone();
                tokio::spawn(async move {
                    // Connection errors are expected in tests (client drops).
                    let _ = handle_connection(stream, conn_state).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<Mutex<HubState>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws.split();

    // Handshake: first text frame carries the protocol request; reply with
    // the empty-object success record.
    loop {
        match read.next().await {
            None => return Ok(()),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::Text(_))) => {
                write.send(Message::Text(format!("{{}}{}", '\u{1e}').into())).await?;
                break;
            }
            Some(Ok(Message::Close(_))) => return Ok(()),
            Some(Ok(_)) => continue,
        }
    }

    // Register the connection and its writer task.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = {
        let mut s = state.lock().unwrap();
        let id = s.next_conn_id;
        s.next_conn_id += 1;
        s.conns.insert(id, out_tx);
        id
    };
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(msg_result) = read.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        for record in split_records(&text) {
            let Ok(HubMessage::Invocation(invocation)) = decode_message(record) else {
                continue;
            };
            handle_invocation(&state, conn_id, &invocation.target, &invocation.arguments);
        }
    }

    // Unregister on disconnect.
    {
        let mut s = state.lock().unwrap();
        s.conns.remove(&conn_id);
        for members in s.groups.values_mut() {
            members.retain(|id| *id != conn_id);
        }
    }
    writer.abort();
    Ok(())
}

fn handle_invocation(state: &Mutex<HubState>, conn_id: u64, target: &str, arguments: &[Value]) {
    match target {
        "JoinGroup" => {
            if let Some(group) = arguments.first().and_then(Value::as_str) {
                let mut s = state.lock().unwrap();
                s.groups.entry(group.to_owned()).or_default().push(conn_id);
                s.joins.push(JoinRecord { group: group.to_owned(), at: Instant::now() });
            }
        }
        "LeaveGroup" => {
            if let Some(group) = arguments.first().and_then(Value::as_str) {
                let mut s = state.lock().unwrap();
                if let Some(members) = s.groups.get_mut(group) {
                    members.retain(|id| *id != conn_id);
                }
            }
        }
        method => {
            // Any three-argument invocation is treated as a send and
            // captured for assertions.
            if let (Some(group), Some(target_name), Some(payload)) =
                (arguments.first(), arguments.get(1), arguments.get(2))
            {
                if let (Some(group), Some(target_name)) = (group.as_str(), target_name.as_str()) {
                    state.lock().unwrap().sent.push(SentMessage {
                        method: method.to_owned(),
                        group: group.to_owned(),
                        target: target_name.to_owned(),
                        payload: payload.clone(),
                        received_at: Instant::now(),
                    });
                }
            }
        }
    }
}
