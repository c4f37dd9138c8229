//! Resolution stage: object -> device-set fan-out.
//!
//! Pure apart from the delivery-log side channel; holds no state beyond the
//! catalog handle.

use crate::catalog::DeviceCatalog;
use crate::counters::PipelineCounters;
use crate::delivery_log::DeliveryLogHandle;
use bridge_protocol::{MappedEvent, ResolvedEvent};
use std::sync::Arc;
use tracing::debug;

pub struct Resolver {
    catalog: Arc<DeviceCatalog>,
    counters: Arc<PipelineCounters>,
    log: DeliveryLogHandle,
}

impl Resolver {
    pub fn new(
        catalog: Arc<DeviceCatalog>,
        counters: Arc<PipelineCounters>,
        log: DeliveryLogHandle,
    ) -> Self {
        Resolver { catalog, counters, log }
    }

    /// Expand a mapped event to its subscriber devices, or drop it when the
    /// object has none.
    pub fn resolve(&self, event: MappedEvent) -> Option<ResolvedEvent> {
        let devices = self.catalog.devices_for(&event.object);
        if devices.is_empty() {
            self.counters.incr_no_targets();
            debug!(trace_id = %event.trace_id, object = %event.object, "no target devices");
            return None;
        }

        self.log.processed(&event.trace_id, &event.object, devices);

        Some(ResolvedEvent {
            trace_id: event.trace_id,
            object: event.object,
            value: event.value,
            devices: devices.to_vec(),
        })
    }
}
