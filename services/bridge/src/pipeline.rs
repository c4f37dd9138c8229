//! The pipeline task: the single logical context every frame progresses on.
//!
//! Frames arrive over the ingest hand-off channel in per-connection order
//! and run Mapper -> Resolver sequentially; resolved events are queued to
//! the egress task. Mapping and resolution never suspend, so stage
//! progression for one frame cannot interleave with another's.

use crate::client::shutdown_signal;
use crate::counters::PipelineCounters;
use crate::mapper::Mapper;
use crate::resolver::Resolver;
use bridge_protocol::{IngressEvent, ResolvedEvent};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

pub fn spawn(
    mapper: Mapper,
    resolver: Resolver,
    rx: mpsc::Receiver<IngressEvent>,
    egress_tx: mpsc::Sender<ResolvedEvent>,
    counters: Arc<PipelineCounters>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(mapper, resolver, rx, egress_tx, counters, shutdown))
}

async fn run(
    mut mapper: Mapper,
    resolver: Resolver,
    mut rx: mpsc::Receiver<IngressEvent>,
    egress_tx: mpsc::Sender<ResolvedEvent>,
    counters: Arc<PipelineCounters>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_signal(&mut shutdown) => break,
            event = rx.recv() => match event {
                None => break,
                Some(event) => {
                    counters.incr_ingested();
                    let Ok(mapped) = mapper.map(&event) else { continue };
                    let Some(resolved) = resolver.resolve(mapped) else { continue };
                    if egress_tx.send(resolved).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
