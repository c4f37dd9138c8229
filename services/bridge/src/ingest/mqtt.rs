//! MQTT ingest dialect.
//!
//! One subscription at the configured QoS; every publish packet is one JSON
//! frame. A fresh client/event loop pair is built per connection attempt so
//! the reconnect schedule stays under the state machine's control rather
//! than the library's.

use super::{IngestSettings, LoopEnd};
use crate::backoff::Backoff;
use crate::client::{ClientState, backoff_sleep, idle_sleep, shutdown_signal, transition};
use crate::config::MqttConfig;
use crate::counters::PipelineCounters;
use crate::mqtt::{mqtt_options, qos_level};
use bridge_protocol::{IngressEvent, IngressMeta, TransportKind};
use rumqttc::{AsyncClient, Event, EventLoop, Packet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{info, warn};

const CLIENT: &str = "mqtt-ingest";

pub(crate) async fn run(
    cfg: MqttConfig,
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
        let client_id = format!("bridge-ingest-{}", uuid::Uuid::new_v4().simple());
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(&cfg, &client_id), 64);

        match wait_for(&mut eventloop, &mut shutdown, |p| {
            matches!(p, Packet::ConnAck(ack) if ack.code == rumqttc::ConnectReturnCode::Success)
        })
        .await
        {
            Wait::Shutdown => break,
            Wait::Failed(e) => {
                warn!(error = %e, "mqtt connect failed");
                transition(CLIENT, ClientState::Backoff);
                if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            }
            Wait::Got => {}
        }

        transition(CLIENT, ClientState::JoinedPending);
        if let Err(e) = client.subscribe(cfg.topic.clone(), qos_level(cfg.qos)).await {
            warn!(error = %e, topic = %cfg.topic, "mqtt subscribe failed");
            transition(CLIENT, ClientState::Backoff);
            if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                break;
            }
            continue;
        }
        match wait_for(&mut eventloop, &mut shutdown, |p| matches!(p, Packet::SubAck(_))).await {
            Wait::Shutdown => break,
            Wait::Failed(e) => {
                warn!(error = %e, topic = %cfg.topic, "mqtt subscription not acknowledged");
                transition(CLIENT, ClientState::Backoff);
                if backoff_sleep(backoff.next_delay(), &mut shutdown).await {
                    break;
                }
                continue;
            }
            Wait::Got => {}
        }

        transition(CLIENT, ClientState::Ready);
        backoff.reset();
        info!(topic = %cfg.topic, qos = cfg.qos, "mqtt ingest ready");

        match ready_loop(&settings, &mut eventloop, &tx, &counters, &mut shutdown).await {
            LoopEnd::Shutdown => {
                transition(CLIENT, ClientState::Closing);
                let _ = client.unsubscribe(cfg.topic.clone()).await;
                let _ = client.disconnect().await;
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

enum Wait {
    Got,
    Failed(String),
    Shutdown,
}

/// Drive the event loop until a wanted packet, an error, or shutdown.
async fn wait_for(
    eventloop: &mut EventLoop,
    shutdown: &mut watch::Receiver<bool>,
    want: fn(&Packet) -> bool,
) -> Wait {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => return Wait::Shutdown,
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(packet)) if want(&packet) => return Wait::Got,
                Ok(_) => {}
                Err(e) => return Wait::Failed(e.to_string()),
            }
        }
    }
}

async fn ready_loop(
    settings: &IngestSettings,
    eventloop: &mut EventLoop,
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
            polled = eventloop.poll() => match polled {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    last_frame = Instant::now();
                    let raw: serde_json::Value = match serde_json::from_slice(&publish.payload) {
                        Ok(raw) => raw,
                        Err(e) => {
                            counters.incr_invalid_payload();
                            warn!(error = %e, topic = %publish.topic, "dropping non-JSON frame");
                            continue;
                        }
                    };
                    let event = IngressEvent::from_frame(
                        raw,
                        IngressMeta {
                            source: TransportKind::Mqtt,
                            address: publish.topic.clone(),
                            received_at: chrono::Utc::now(),
                        },
                    );
                    if tx.send(event).await.is_err() {
                        // Pipeline gone; only happens on shutdown.
                        return LoopEnd::Shutdown;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt connection lost");
                    return LoopEnd::Lost;
                }
            }
        }
    }
}
