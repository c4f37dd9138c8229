//! Shared per-stage counters.
//!
//! Every drop path increments exactly one counter; nothing at event level is
//! fatal. The supervisor logs a snapshot periodically and tests assert on
//! snapshots directly.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineCounters {
    ingested: AtomicU64,
    invalid_payload: AtomicU64,
    unmapped: AtomicU64,
    coercion_failed: AtomicU64,
    no_targets: AtomicU64,
    sent: AtomicU64,
    send_failed: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub ingested: u64,
    pub invalid_payload: u64,
    pub unmapped: u64,
    pub coercion_failed: u64,
    pub no_targets: u64,
    pub sent: u64,
    pub send_failed: u64,
}

impl PipelineCounters {
    pub fn incr_ingested(&self) {
        self.ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_invalid_payload(&self) {
        self.invalid_payload.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_unmapped(&self) {
        self.unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_coercion_failed(&self) {
        self.coercion_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_no_targets(&self) {
        self.no_targets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_send_failed(&self) {
        self.send_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            ingested: self.ingested.load(Ordering::Relaxed),
            invalid_payload: self.invalid_payload.load(Ordering::Relaxed),
            unmapped: self.unmapped.load(Ordering::Relaxed),
            coercion_failed: self.coercion_failed.load(Ordering::Relaxed),
            no_targets: self.no_targets.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_failed: self.send_failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = PipelineCounters::default();
        counters.incr_ingested();
        counters.incr_ingested();
        counters.incr_unmapped();
        counters.incr_sent();

        let snap = counters.snapshot();
        assert_eq!(snap.ingested, 2);
        assert_eq!(snap.unmapped, 1);
        assert_eq!(snap.sent, 1);
        assert_eq!(snap.invalid_payload, 0);
        assert_eq!(snap.send_failed, 0);
    }
}
