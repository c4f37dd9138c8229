//! SignalR egress dialect.
//!
//! Sends are hub invocations `SendMessage(group, target, json_payload)`
//! where `group` is the device id and `json_payload` is the serialized
//! egress frame (or an array of frames in batched mode). The hub method and
//! target names come from config to accommodate server-side variations.

use super::{Maintenance, SendError};
use crate::config::SignalrConfig;
use crate::hub::{HubConnection, HubEvent};
use serde_json::json;
use tracing::debug;

pub(crate) struct SignalrEgress {
    cfg: SignalrConfig,
    conn: Option<HubConnection>,
}

impl SignalrEgress {
    pub fn new(cfg: SignalrConfig) -> Self {
        SignalrEgress { cfg, conn: None }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn connect(&mut self) -> Result<(), SendError> {
        let conn = HubConnection::connect(&self.cfg.url)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        self.conn = Some(conn);
        Ok(())
    }

    pub async fn send(&mut self, device: &str, body: String) -> Result<(), SendError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(SendError::NotConnected);
        };
        let arguments = vec![json!(device), json!(self.cfg.target), json!(body)];
        match conn.invoke(&self.cfg.send_method, arguments).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed write means the socket is gone.
                self.conn = None;
                Err(SendError::Transport(e.to_string()))
            }
        }
    }

    /// One fresh connection attempt (the per-send retry path).
    pub async fn force_reconnect(&mut self) -> Result<(), SendError> {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
        self.connect().await
    }

    /// Drop the connection so the worker's reconnect loop dials a new one.
    pub fn drop_connection(&mut self) {
        if let Some(conn) = self.conn.take() {
            tokio::spawn(async move { conn.close().await });
        }
    }

    /// Drain inbound hub traffic between sends; only a close matters.
    pub async fn maintenance(&mut self) -> Maintenance {
        let Some(conn) = self.conn.as_mut() else {
            return Maintenance::Lost;
        };
        match conn.next_event().await {
            Ok(HubEvent::Invocation(invocation)) => {
                debug!(target = %invocation.target, "ignoring inbound invocation on egress hub");
                Maintenance::StatusChanged
            }
            Ok(HubEvent::Closed { error }) => {
                debug!(error = ?error, "egress hub closed");
                self.conn = None;
                Maintenance::Lost
            }
            Err(_) => {
                self.conn = None;
                Maintenance::Lost
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.close().await;
        }
    }
}
