//! Ingest client: one persistent upstream connection feeding the pipeline.
//!
//! Both dialects drive the same state machine:
//!
//! ```text
//! Disconnected -> Connecting -> JoinedPending -> Ready -> Closing
//!                     ^              |             |
//!                     +---- Backoff <+-------------+  (loss or idle timeout)
//! ```
//!
//! The backoff schedule starts at 1 s, doubles per failure, caps at 30 s and
//! resets on every entry to `Ready`. An idle watchdog forces `Backoff` when
//! no frame arrives within the configured window, covering half-open
//! connections whose peer went silent.
//!
//! Frames are parsed in the client task but only enter pipeline state through
//! the `mpsc` hand-off channel, which also preserves per-connection order.

mod mqtt;
mod signalr;

use crate::config::AppConfig;
use crate::counters::PipelineCounters;
use bridge_protocol::{IngressEvent, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// `None` disables the idle watchdog.
    pub idle_timeout: Option<Duration>,
}

impl IngestSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let secs = config.pipeline.ingest_idle_timeout_seconds;
        IngestSettings {
            idle_timeout: (secs > 0).then(|| Duration::from_secs(secs)),
        }
    }
}

/// Why a ready loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEnd {
    Shutdown,
    Lost,
    Idle,
}

/// Start the ingest client for the configured dialect.
pub fn spawn(
    config: &AppConfig,
    tx: mpsc::Sender<IngressEvent>,
    counters: Arc<PipelineCounters>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let settings = IngestSettings::from_config(config);
    match config.input.kind {
        TransportKind::Mqtt => {
            let cfg = config.input.mqtt().clone();
            tokio::spawn(mqtt::run(cfg, settings, tx, counters, shutdown))
        }
        TransportKind::Signalr => {
            let cfg = config.input.signalr().clone();
            tokio::spawn(signalr::run(cfg, settings, tx, counters, shutdown))
        }
    }
}

