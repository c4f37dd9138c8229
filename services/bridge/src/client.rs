//! State vocabulary and timing helpers shared by the ingest and egress
//! clients.

use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Connection lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    JoinedPending,
    Ready,
    Backoff,
    Closing,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClientState::Disconnected => "disconnected",
            ClientState::Connecting => "connecting",
            ClientState::JoinedPending => "joined-pending",
            ClientState::Ready => "ready",
            ClientState::Backoff => "backoff",
            ClientState::Closing => "closing",
        };
        write!(f, "{name}")
    }
}

pub(crate) fn transition(client: &str, state: ClientState) {
    info!(client, state = %state, "state transition");
}

/// Resolves once shutdown is signalled. Exists so `select!` arms that race
/// this against a branch needing a second `&mut` borrow of `shutdown` (or a
/// branch that awaits across the match) don't capture `watch::Ref`'s
/// non-`Send` guard in the generated future.
pub(crate) async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep the backoff delay; returns true if shutdown was signalled first.
pub(crate) async fn backoff_sleep(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Resolves at `since + timeout`, or never when the watchdog is disabled.
pub(crate) async fn idle_sleep(timeout: Option<Duration>, since: tokio::time::Instant) {
    match timeout {
        Some(t) => tokio::time::sleep_until(since + t).await,
        None => std::future::pending().await,
    }
}
