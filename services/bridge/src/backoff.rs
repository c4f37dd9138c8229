//! Reconnection backoff schedules.
//!
//! Both clients share the same outer schedule: 1 s initial delay, doubled on
//! each failure, capped at 30 s, reset to 1 s on every successful entry to
//! `Ready`. The SignalR ingest additionally retries `JoinGroup` on a faster
//! inner schedule (0.2 s -> 2.0 s, five attempts) before surrendering the
//! connection to the outer one.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Backoff { initial, cap, next: initial }
    }

    /// The outer reconnect schedule (1 s .. 30 s).
    pub fn reconnect() -> Self {
        Backoff::new(Duration::from_secs(1), Duration::from_secs(30))
    }

    /// The inner JoinGroup schedule (0.2 s .. 2.0 s).
    pub fn join_group() -> Self {
        Backoff::new(Duration::from_millis(200), Duration::from_secs(2))
    }

    /// Attempts allowed on the inner JoinGroup schedule.
    pub const JOIN_GROUP_ATTEMPTS: u32 = 5;

    /// The delay to sleep before the next attempt; doubles for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = std::cmp::min(self.next * 2, self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}
