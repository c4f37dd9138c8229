//! MQTT egress dialect.
//!
//! The network side lives in an inner driver task that polls the rumqttc
//! event loop, publishes connection status over a watch channel, and applies
//! the reconnect backoff itself. The worker publishes through the shared
//! `AsyncClient`; a publish is accepted only while the session is up, so
//! nothing is buffered across an outage.

use super::{Maintenance, SendError};
use crate::backoff::Backoff;
use crate::client::{ClientState, backoff_sleep, shutdown_signal, transition};
use crate::config::MqttConfig;
use crate::mqtt::{device_topic, mqtt_options, qos_level};
use rumqttc::{AsyncClient, Event, EventLoop, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CLIENT: &str = "mqtt-egress";

pub(crate) struct MqttEgress {
    cfg: MqttConfig,
    qos: QoS,
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    driver: JoinHandle<()>,
    shutdown: watch::Receiver<bool>,
}

impl MqttEgress {
    pub fn start(cfg: MqttConfig, shutdown: watch::Receiver<bool>) -> Self {
        let (client, connected, driver) = launch(&cfg, shutdown.clone());
        MqttEgress { qos: qos_level(cfg.qos), cfg, client, connected, driver, shutdown }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub async fn send(&mut self, device: &str, body: Vec<u8>) -> Result<(), SendError> {
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        self.client
            .publish(device_topic(device), self.qos, false, body)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    /// Wait briefly for the driver's reconnect loop to bring the session
    /// back; the driver keeps its own backoff schedule.
    pub async fn wait_connected(&mut self, limit: Duration) -> Result<(), SendError> {
        match tokio::time::timeout(limit, self.connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(SendError::NotConnected),
        }
    }

    /// Tear down the client and dial a fresh session (idle-watchdog path).
    pub fn restart(&mut self) {
        self.driver.abort();
        let (client, connected, driver) = launch(&self.cfg, self.shutdown.clone());
        self.client = client;
        self.connected = connected;
        self.driver = driver;
    }

    pub async fn maintenance(&mut self) -> Maintenance {
        if self.connected.changed().await.is_err() {
            return Maintenance::Lost;
        }
        if *self.connected.borrow() { Maintenance::StatusChanged } else { Maintenance::Lost }
    }

    pub async fn close(&mut self) {
        let _ = self.client.disconnect().await;
        self.driver.abort();
    }
}

fn launch(
    cfg: &MqttConfig,
    shutdown: watch::Receiver<bool>,
) -> (AsyncClient, watch::Receiver<bool>, JoinHandle<()>) {
    let client_id = format!("bridge-egress-{}", uuid::Uuid::new_v4().simple());
    let (client, eventloop) = AsyncClient::new(mqtt_options(cfg, &client_id), 64);
    let (status_tx, status_rx) = watch::channel(false);
    let driver = tokio::spawn(driver_loop(eventloop, status_tx, shutdown));
    (client, status_rx, driver)
}

async fn driver_loop(
    mut eventloop: EventLoop,
    status: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::reconnect();
    transition(CLIENT, ClientState::Connecting);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal(&mut shutdown) => break,
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack)))
                    if ack.code == rumqttc::ConnectReturnCode::Success =>
                {
                    backoff.reset();
                    let _ = status.send(true);
                    transition(CLIENT, ClientState::Ready);
                    info!("mqtt egress connected");
                }
                Ok(_) => {}
                Err(e) => {
                    let was_up = *status.borrow();
                    let _ = status.send(false);
                    if was_up {
                        warn!(error = %e, "mqtt egress connection lost");
                    }
                    transition(CLIENT, ClientState::Backoff);
                    if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                        break;
                    }
                    transition(CLIENT, ClientState::Connecting);
                }
            }
        }
    }
}
