//! Supervisor: owns the catalogs and both clients, wires the stages, and
//! manages start/stop.
//!
//! Stages start in reverse-dataflow order (delivery log, egress, pipeline,
//! ingest) so every consumer exists before its producer, then stop in
//! forward-dataflow order with a 5 s bound per stage. Shutdown is a single
//! watch-channel signal observed by every stage; signalling it twice is a
//! no-op.

use crate::catalog::{CatalogError, DeviceCatalog, MappingCatalog};
use crate::config::{AppConfig, ConfigError};
use crate::counters::PipelineCounters;
use crate::delivery_log::{self, DeliveryLogConfig};
use crate::mapper::Mapper;
use crate::resolver::Resolver;
use crate::{egress, ingest, pipeline};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 1024;
const STAGE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("{0}")]
    Runtime(String),
}

impl BridgeError {
    /// Process exit code: 2 for config/catalog documents, 3 for catalog
    /// reference problems, 1 for anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Config(_) => 2,
            BridgeError::Catalog(e) if e.is_reference() => 3,
            BridgeError::Catalog(_) => 2,
            BridgeError::Runtime(_) => 1,
        }
    }
}

/// Handles to every running stage, in dataflow order.
pub struct Stages {
    pub counters: Arc<PipelineCounters>,
    ingest: JoinHandle<()>,
    pipeline: JoinHandle<()>,
    egress: JoinHandle<()>,
    delivery_log: JoinHandle<()>,
    stats: JoinHandle<()>,
}

impl Stages {
    /// Stop stages in forward-dataflow order. The shutdown signal must
    /// already be set; this only waits (bounded) for each stage to finish.
    pub async fn stop(self) {
        stop_stage("ingest", self.ingest).await;
        stop_stage("pipeline", self.pipeline).await;
        stop_stage("egress", self.egress).await;
        stop_stage("delivery-log", self.delivery_log).await;
        stop_stage("stats", self.stats).await;
    }
}

/// Load catalogs and start every stage in reverse-dataflow order.
pub fn start(config: &AppConfig, shutdown: watch::Receiver<bool>) -> Result<Stages, BridgeError> {
    let mapping = Arc::new(MappingCatalog::load(&config.mapping_catalog_path)?);
    let devices = Arc::new(DeviceCatalog::load(&config.device_catalog_path)?);
    info!(
        rules = mapping.len(),
        objects = devices.len(),
        input = %config.input.kind,
        transports = %config.transports.kind,
        "catalogs loaded"
    );

    let counters = Arc::new(PipelineCounters::default());

    let (log_handle, log_task) =
        delivery_log::spawn(DeliveryLogConfig::from_logging(&config.logging), shutdown.clone());

    let (egress_tx, egress_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let egress_task =
        egress::spawn(config, egress_rx, counters.clone(), log_handle.clone(), shutdown.clone());

    let mapper = Mapper::new(mapping, counters.clone());
    let resolver = Resolver::new(devices, counters.clone(), log_handle);
    let (ingress_tx, ingress_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let pipeline_task = pipeline::spawn(
        mapper,
        resolver,
        ingress_rx,
        egress_tx,
        counters.clone(),
        shutdown.clone(),
    );

    let ingest_task = ingest::spawn(config, ingress_tx, counters.clone(), shutdown.clone());

    let stats_task =
        spawn_stats(counters.clone(), config.pipeline.stats_interval_seconds, shutdown);

    Ok(Stages {
        counters,
        ingest: ingest_task,
        pipeline: pipeline_task,
        egress: egress_task,
        delivery_log: log_task,
        stats: stats_task,
    })
}

/// Build the pipeline, run it, and block until a stop signal arrives.
pub async fn run(config: AppConfig) -> Result<(), BridgeError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stages = start(&config, shutdown_rx)?;

    wait_for_stop_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    stages.stop().await;
    info!("bridge stopped");
    Ok(())
}

async fn stop_stage(stage: &str, mut task: JoinHandle<()>) {
    match tokio::time::timeout(STAGE_STOP_TIMEOUT, &mut task).await {
        Ok(_) => info!(stage, "stage stopped"),
        Err(_) => {
            warn!(stage, "stage did not stop within bound, abandoning");
            task.abort();
        }
    }
}

async fn wait_for_stop_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot register SIGTERM handler, using ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Periodic counter snapshot line; 0 disables it.
fn spawn_stats(
    counters: Arc<PipelineCounters>,
    interval_seconds: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval_seconds == 0 {
            let _ = shutdown.wait_for(|stop| *stop).await;
            return;
        }
        let mut tick = tokio::time::interval(Duration::from_secs(interval_seconds));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = tick.tick() => {
                    let s = counters.snapshot();
                    info!(
                        ingested = s.ingested,
                        invalid_payload = s.invalid_payload,
                        unmapped = s.unmapped,
                        coercion_failed = s.coercion_failed,
                        no_targets = s.no_targets,
                        sent = s.sent,
                        send_failed = s.send_failed,
                        "pipeline counters"
                    );
                }
            }
        }
    })
}
