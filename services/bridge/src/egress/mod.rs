//! Egress client: one persistent downstream connection for the process.
//!
//! A single task owns the transport and consumes resolved events from an
//! `mpsc` channel; that ownership serializes sends (the single-writer
//! discipline transport libraries assume) while stages enqueue freely.
//!
//! Per `(device, event)` pair: one timed send, then on failure one forced
//! reconnect and one retry, then the pair is abandoned and the failure
//! counted for that device alone. Successful sends append a record to the
//! delivery log. An idle watchdog restarts the connection when no send has
//! succeeded within its window.
//!
//! With `batch_mode = "batched"` (SignalR only), sends queued for the same
//! device within the flush window are coalesced into one invocation carrying
//! a payload array; order within a device is never changed and a failed
//! batch call falls back to per-message sends.

mod mqtt;
mod signalr;

use crate::backoff::Backoff;
use crate::client::{ClientState, idle_sleep, shutdown_signal, transition};
use crate::config::AppConfig;
use crate::counters::PipelineCounters;
use crate::delivery_log::DeliveryLogHandle;
use bridge_protocol::{EgressPayload, ResolvedEvent, TransportKind};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const CLIENT: &str = "egress";

/// How long a per-send forced reconnect may wait for the MQTT driver to
/// re-establish the session.
const FORCED_RECONNECT_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("send timed out")]
    Timeout,
    #[error("{0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BatchSettings {
    pub flush_window: Duration,
    pub max_events: usize,
}

#[derive(Debug, Clone)]
pub struct EgressSettings {
    pub send_timeout: Duration,
    /// `None` disables the idle watchdog.
    pub idle_timeout: Option<Duration>,
    /// `Some` only for the SignalR dialect in batched mode.
    pub batching: Option<BatchSettings>,
    /// A device whose send ultimately failed receives nothing further, so
    /// its delivery order never shows a gap-then-resume.
    pub strict_device_order: bool,
}

impl EgressSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        let batching = (config.transports.kind == TransportKind::Signalr
            && p.batch_mode == "batched")
            .then(|| BatchSettings {
                flush_window: Duration::from_millis(p.batch_flush_ms),
                max_events: p.batch_max_events,
            });
        EgressSettings {
            send_timeout: Duration::from_secs(p.send_timeout_seconds),
            idle_timeout: (p.egress_idle_timeout_seconds > 0)
                .then(|| Duration::from_secs(p.egress_idle_timeout_seconds)),
            batching,
            strict_device_order: p.strict_device_order,
        }
    }
}

/// Start the egress task for the configured dialect.
pub fn spawn(
    config: &AppConfig,
    rx: mpsc::Receiver<ResolvedEvent>,
    counters: Arc<PipelineCounters>,
    log: DeliveryLogHandle,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let settings = EgressSettings::from_config(config);
    let transport = match config.transports.kind {
        TransportKind::Mqtt => {
            Transport::Mqtt(mqtt::MqttEgress::start(config.transports.mqtt().clone(), shutdown.clone()))
        }
        TransportKind::Signalr => {
            Transport::Signalr(signalr::SignalrEgress::new(config.transports.signalr().clone()))
        }
    };
    let worker = Worker {
        transport,
        settings,
        rx,
        counters,
        log,
        shutdown,
        backoff: Backoff::reconnect(),
        reconnect_at: Instant::now(),
        last_success: Instant::now(),
        dead_devices: HashSet::new(),
    };
    tokio::spawn(worker.run())
}

// ---------------------------------------------------------------------------
// Transport dispatch
// ---------------------------------------------------------------------------

/// Signal from the connection while no send is in flight.
pub(crate) enum Maintenance {
    Lost,
    StatusChanged,
}

enum Transport {
    Mqtt(mqtt::MqttEgress),
    Signalr(signalr::SignalrEgress),
}

impl Transport {
    fn is_connected(&self) -> bool {
        match self {
            Transport::Mqtt(t) => t.is_connected(),
            Transport::Signalr(t) => t.is_connected(),
        }
    }

    /// True when the worker loop, not an inner driver, dials reconnects.
    fn reconnects_externally(&self) -> bool {
        matches!(self, Transport::Signalr(_))
    }

    async fn connect(&mut self) -> Result<(), SendError> {
        match self {
            Transport::Mqtt(_) => Ok(()),
            Transport::Signalr(t) => t.connect().await,
        }
    }

    /// The per-send-retry reconnect: one attempt, bounded.
    async fn force_reconnect(&mut self) -> Result<(), SendError> {
        match self {
            Transport::Mqtt(t) => t.wait_connected(FORCED_RECONNECT_WAIT).await,
            Transport::Signalr(t) => t.force_reconnect().await,
        }
    }

    /// The idle-watchdog restart: tear the connection down so a fresh one
    /// is dialed.
    fn restart(&mut self) {
        match self {
            Transport::Mqtt(t) => t.restart(),
            Transport::Signalr(t) => t.drop_connection(),
        }
    }

    async fn send_one(&mut self, device: &str, payload: &EgressPayload) -> Result<(), SendError> {
        match self {
            Transport::Mqtt(t) => {
                let body = serde_json::to_vec(payload)
                    .map_err(|e| SendError::Transport(e.to_string()))?;
                t.send(device, body).await
            }
            Transport::Signalr(t) => {
                let body = serde_json::to_string(payload)
                    .map_err(|e| SendError::Transport(e.to_string()))?;
                t.send(device, body).await
            }
        }
    }

    /// One invocation carrying an array of payloads (SignalR only; the MQTT
    /// dialect never batches).
    async fn send_batch(
        &mut self,
        device: &str,
        payloads: &[EgressPayload],
    ) -> Result<(), SendError> {
        match self {
            Transport::Mqtt(_) => Err(SendError::Transport("batching unsupported".to_owned())),
            Transport::Signalr(t) => {
                let body = serde_json::to_string(payloads)
                    .map_err(|e| SendError::Transport(e.to_string()))?;
                t.send(device, body).await
            }
        }
    }

    async fn maintenance(&mut self) -> Maintenance {
        match self {
            Transport::Mqtt(t) => t.maintenance().await,
            Transport::Signalr(t) => t.maintenance().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Transport::Mqtt(t) => t.close().await,
            Transport::Signalr(t) => t.close().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    transport: Transport,
    settings: EgressSettings,
    rx: mpsc::Receiver<ResolvedEvent>,
    counters: Arc<PipelineCounters>,
    log: DeliveryLogHandle,
    shutdown: watch::Receiver<bool>,
    backoff: Backoff,
    reconnect_at: Instant,
    last_success: Instant,
    dead_devices: HashSet<String>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let connected = self.transport.is_connected();
            let dial = self.transport.reconnects_externally() && !connected;
            let idle_armed = self.settings.idle_timeout.is_some() && connected;
            tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown) => break,
                _ = tokio::time::sleep_until(self.reconnect_at), if dial => {
                    transition(CLIENT, ClientState::Connecting);
                    match self.transport.connect().await {
                        Ok(()) => {
                            self.backoff.reset();
                            self.last_success = Instant::now();
                            transition(CLIENT, ClientState::Ready);
                        }
                        Err(e) => {
                            warn!(error = %e, "egress connect failed");
                            transition(CLIENT, ClientState::Backoff);
                            self.reconnect_at = Instant::now() + self.backoff.next_delay();
                        }
                    }
                }
                m = self.transport.maintenance(), if connected => {
                    if matches!(m, Maintenance::Lost) {
                        warn!("egress connection lost");
                        self.reconnect_at = Instant::now();
                    }
                }
                _ = idle_sleep(self.settings.idle_timeout, self.last_success), if idle_armed => {
                    warn!("no successful send within idle timeout, restarting connection");
                    self.transport.restart();
                    self.reconnect_at = Instant::now();
                    self.last_success = Instant::now();
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                }
            }
        }
        transition(CLIENT, ClientState::Closing);
        self.transport.close().await;
    }

    /// Fan one resolved event out to its devices, in catalog order. In
    /// batched mode, further queued events may join the same flush window.
    async fn handle_event(&mut self, event: ResolvedEvent) {
        let mut pairs = expand(&event);

        if let Some(batch) = self.settings.batching {
            let deadline = Instant::now() + batch.flush_window;
            while pairs.len() < batch.max_events {
                match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(next)) => pairs.extend(expand(&next)),
                    Ok(None) | Err(_) => break,
                }
            }
            // Group per device, preserving first-appearance order across
            // devices and send order within each device.
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<EgressPayload>> = HashMap::new();
            for (device, payload) in pairs {
                if !groups.contains_key(&device) {
                    order.push(device.clone());
                }
                groups.entry(device).or_default().push(payload);
            }
            for device in order {
                let payloads = groups.remove(&device).unwrap_or_default();
                self.send_group(&device, payloads).await;
            }
        } else {
            for (device, payload) in pairs {
                self.send_group(&device, vec![payload]).await;
            }
        }
    }

    async fn send_group(&mut self, device: &str, payloads: Vec<EgressPayload>) {
        if self.settings.strict_device_order && self.dead_devices.contains(device) {
            debug!(device, "skipping send to device with broken order");
            for payload in &payloads {
                self.record_failure(device, payload);
            }
            return;
        }

        if payloads.len() > 1 {
            let limit = self.settings.send_timeout;
            match timed(limit, self.transport.send_batch(device, &payloads)).await {
                Ok(()) => {
                    for payload in &payloads {
                        self.record_success(device, payload);
                    }
                    return;
                }
                Err(e) => {
                    warn!(device, error = %e, n = payloads.len(),
                        "batch send failed, falling back to per-message");
                }
            }
        }

        for payload in &payloads {
            if self.send_with_retry(device, payload).await {
                self.record_success(device, payload);
            } else {
                self.record_failure(device, payload);
                if self.settings.strict_device_order {
                    self.dead_devices.insert(device.to_owned());
                }
            }
        }
    }

    /// One timed attempt, then one forced reconnect and one retry.
    async fn send_with_retry(&mut self, device: &str, payload: &EgressPayload) -> bool {
        let limit = self.settings.send_timeout;
        match timed(limit, self.transport.send_one(device, payload)).await {
            Ok(()) => true,
            Err(first) => {
                warn!(device, error = %first, "send failed, reconnecting for one retry");
                if let Err(e) = self.transport.force_reconnect().await {
                    warn!(device, error = %e, "forced reconnect failed");
                    return false;
                }
                match timed(limit, self.transport.send_one(device, payload)).await {
                    Ok(()) => true,
                    Err(second) => {
                        warn!(device, error = %second, "retry failed, giving up on this send");
                        false
                    }
                }
            }
        }
    }

    fn record_success(&mut self, device: &str, payload: &EgressPayload) {
        self.counters.incr_sent();
        self.last_success = Instant::now();
        self.log.sent(bridge_protocol::DeliveryRecord {
            trace_id: payload.trace_id.clone().unwrap_or_default(),
            device_id: device.to_owned(),
            object: payload.object.clone(),
            value: payload.value.clone(),
            sent_at: chrono::Utc::now(),
        });
    }

    fn record_failure(&mut self, device: &str, payload: &EgressPayload) {
        self.counters.incr_send_failed();
        error!(
            device,
            object = %payload.object,
            trace_id = payload.trace_id.as_deref().unwrap_or(""),
            "delivery failed for device"
        );
    }
}

/// Apply the per-send deadline; expiry counts as a send failure.
async fn timed<F>(limit: Duration, fut: F) -> Result<(), SendError>
where
    F: std::future::Future<Output = Result<(), SendError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(SendError::Timeout),
    }
}

/// Per-device send pairs for one event, in catalog order. The device id
/// only addresses the send (topic or group); the payload body is identical
/// across the fan-out. Duplicate device ids stay duplicated.
fn expand(event: &ResolvedEvent) -> Vec<(String, EgressPayload)> {
    event
        .devices
        .iter()
        .map(|device| (device.clone(), EgressPayload::from_event(event)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_protocol::CoercedValue;

    #[test]
    fn expand_preserves_catalog_order_and_duplicates() {
        let event = ResolvedEvent {
            trace_id: "t1".to_owned(),
            object: "ENG.RPM".to_owned(),
            value: CoercedValue::Integer(1420),
            devices: vec!["VM-A".to_owned(), "VM-B".to_owned(), "VM-B".to_owned()],
        };
        let pairs = expand(&event);
        let devices: Vec<&str> = pairs.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(devices, ["VM-A", "VM-B", "VM-B"]);
        assert!(pairs.iter().all(|(_, p)| p.object == "ENG.RPM"));
        assert!(pairs.iter().all(|(_, p)| p.trace_id.as_deref() == Some("t1")));
    }
}
