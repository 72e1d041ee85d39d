//! Global atomic counters for Engram.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when a session closes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    events_committed: AtomicU64,
    incidents_committed: AtomicU64,
    telemetry_rejected: AtomicU64,
    write_failures: AtomicU64,
    replays_executed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_committed: AtomicU64::new(0),
            incidents_committed: AtomicU64::new(0),
            telemetry_rejected: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            replays_executed: AtomicU64::new(0),
        }
    }

    pub fn inc_events_committed(&self) {
        self.events_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_committed", "counter incremented");
    }

    pub fn inc_incidents_committed(&self) {
        self.incidents_committed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "incidents_committed", "counter incremented");
    }

    pub fn inc_telemetry_rejected(&self) {
        self.telemetry_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "telemetry_rejected", "counter incremented");
    }

    /// Count an append that failed after all retries.
    pub fn inc_write_failures(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "write_failures", "counter incremented");
    }

    pub fn inc_replays(&self) {
        self.replays_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "replays_executed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_committed = self.events_committed(),
            incidents_committed = self.incidents_committed(),
            telemetry_rejected = self.telemetry_rejected(),
            write_failures = self.write_failures(),
            replays_executed = self.replays_executed(),
        );
    }

    pub fn events_committed(&self) -> u64 {
        self.events_committed.load(Ordering::Relaxed)
    }

    pub fn incidents_committed(&self) -> u64 {
        self.incidents_committed.load(Ordering::Relaxed)
    }

    pub fn telemetry_rejected(&self) -> u64 {
        self.telemetry_rejected.load(Ordering::Relaxed)
    }

    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub fn replays_executed(&self) -> u64 {
        self.replays_executed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.events_committed.store(0, Ordering::Relaxed);
        self.incidents_committed.store(0, Ordering::Relaxed);
        self.telemetry_rejected.store(0, Ordering::Relaxed);
        self.write_failures.store(0, Ordering::Relaxed);
        self.replays_executed.store(0, Ordering::Relaxed);
    }
}
