//! SignalR ingest dialect.
//!
//! After the hub handshake, `JoinGroup` is invoked with an inner retry
//! schedule (five attempts, 0.2 s doubling to a 2 s cap) before the
//! connection is surrendered to the outer backoff. Frames arrive as
//! invocations of the configured target and come in three shapes, all
//! normalized here: a JSON-encoded string, a list whose first element is
//! such a string, or an already-decoded object.

use super::{IngestSettings, LoopEnd};
use crate::backoff::Backoff;
use crate::client::{ClientState, backoff_sleep, idle_sleep, shutdown_signal, transition};
use crate::config::SignalrConfig;
use crate::counters::PipelineCounters;
use crate::hub::{HubConnection, HubEvent};
use bridge_protocol::{IngressEvent, IngressMeta, TransportKind};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

const CLIENT: &str = "signalr-ingest";

pub(crate) async fn run(
    cfg: SignalrConfig,
    settings: IngestSettings,
    tx: mpsc::Sender<IngressEvent>,
    counters: Arc<PipelineCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::reconnect();
    transition(CLIENT, ClientState::Disconnected);

    loop {
        if *shutdown.borrow() {
            break;
        }

        transition(CLIENT, ClientState::Connecting);
        let mut hub = match HubConnection::connect(&cfg.url).await {
            Ok(hub) => hub,
            Err(e) => {
                warn!(error = %e, url = %cfg.url, "hub connect failed");
                transition(CLIENT, ClientState::Backoff);
                if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        transition(CLIENT, ClientState::JoinedPending);
        if !join_group(&mut hub, &cfg.group, &mut shutdown).await {
            if *shutdown.borrow() {
                break;
            }
            transition(CLIENT, ClientState::Backoff);
            if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                break;
            }
            continue;
        }

        transition(CLIENT, ClientState::Ready);
        backoff.reset();
        info!(group = %cfg.group, target = %cfg.target, "signalr ingest ready");

        match ready_loop(&cfg, &settings, &mut hub, &tx, &counters, &mut shutdown).await {
            LoopEnd::Shutdown => {
                transition(CLIENT, ClientState::Closing);
                // Leaving the group is best-effort; the socket close follows
                // regardless.
                let _ = hub.invoke("LeaveGroup", vec![json!(cfg.group)]).await;
                hub.close().await;
                break;
            }
            LoopEnd::Lost | LoopEnd::Idle => {
                transition(CLIENT, ClientState::Backoff);
                if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                    break;
                }
            }
        }
    }
}

/// Invoke `JoinGroup` with the inner retry schedule. False means every
/// attempt failed (or shutdown interrupted the wait).
async fn join_group(
    hub: &mut HubConnection,
    group: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let mut retry = Backoff::join_group();
    for attempt in 1..=Backoff::JOIN_GROUP_ATTEMPTS {
        match hub.invoke("JoinGroup", vec![json!(group)]).await {
            Ok(()) => {
                info!(group, "joined hub group");
                return true;
            }
            Err(e) => {
                warn!(error = %e, attempt, group, "JoinGroup failed, retrying");
                if backoff_sleep(retry.next_delay(), shutdown).await {
                    return false;
                }
            }
        }
    }
    error!(group, "JoinGroup failed permanently");
    false
}

async fn ready_loop(
    cfg: &SignalrConfig,
    settings: &IngestSettings,
    hub: &mut HubConnection,
    tx: &mpsc::Sender<IngressEvent>,
    counters: &PipelineCounters,
    shutdown: &mut watch::Receiver<bool>,
) -> LoopEnd {
    let mut last_frame = Instant::now();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal(shutdown) => return LoopEnd::Shutdown,
            _ = idle_sleep(settings.idle_timeout, last_frame) => {
                warn!("no frame within idle timeout, forcing reconnect");
                return LoopEnd::Idle;
            }
            event = hub.next_event() => match event {
                Ok(HubEvent::Invocation(invocation)) if invocation.target == cfg.target => {
                    last_frame = Instant::now();
                    let Some(raw) = normalize_frame(&invocation.arguments) else {
                        counters.incr_invalid_payload();
                        warn!(target = %invocation.target, "dropping undecodable frame");
                        continue;
                    };
                    let event = IngressEvent::from_frame(
                        raw,
                        IngressMeta {
                            source: TransportKind::Signalr,
                            address: cfg.group.clone(),
                            received_at: chrono::Utc::now(),
                        },
                    );
                    if tx.send(event).await.is_err() {
                        return LoopEnd::Shutdown;
                    }
                }
                Ok(HubEvent::Invocation(_)) => {}
                Ok(HubEvent::Closed { error }) => {
                    warn!(error = ?error, "hub connection closed");
                    return LoopEnd::Lost;
                }
                Err(e) => {
                    warn!(error = %e, "hub connection lost");
                    return LoopEnd::Lost;
                }
            }
        }
    }
}

/// Normalize the three frame shapes a hub delivers into one decoded value.
fn normalize_frame(arguments: &[Value]) -> Option<Value> {
    let first = arguments.first()?;
    match first {
        Value::String(text) => serde_json::from_str(text).ok(),
        Value::Array(items) => {
            let text = items.first()?.as_str()?;
            serde_json::from_str(text).ok()
        }
        Value::Object(_) => Some(first.clone()),
        _ => None,
    }
}
