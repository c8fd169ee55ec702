//! Protocol counters.
//!
//! ```ignore
//! use timewarp_sync::instrumentation::METRICS;
//!
//! let before = METRICS.snapshot();
//! // ... run ...
//! let after = METRICS.snapshot();
//! assert!(after.control_rollbacks >= before.control_rollbacks);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ============================================================================
// Metrics
// ============================================================================

/// Global protocol metrics.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters for the synchronization protocol.
#[derive(Debug)]
pub struct Metrics {
    rendezvous_started: AtomicU64,
    rendezvous_acked: AtomicU64,
    rendezvous_unblocked: AtomicU64,
    unblock_checkpoints: AtomicU64,
    control_antimessages_sent: AtomicU64,
    control_rollbacks: AtomicU64,
    unmatched_rollbacks: AtomicU64,
    late_notifications: AtomicU64,
    group_votes: AtomicU64,
    group_rollbacks: AtomicU64,
    protocol_violations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            rendezvous_started: AtomicU64::new(0),
            rendezvous_acked: AtomicU64::new(0),
            rendezvous_unblocked: AtomicU64::new(0),
            unblock_checkpoints: AtomicU64::new(0),
            control_antimessages_sent: AtomicU64::new(0),
            control_rollbacks: AtomicU64::new(0),
            unmatched_rollbacks: AtomicU64::new(0),
            late_notifications: AtomicU64::new(0),
            group_votes: AtomicU64::new(0),
            group_rollbacks: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
        }
    }

    /// Increments sessions opened by an initiator.
    pub fn increment_rendezvous_started(&self) {
        self.rendezvous_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rendezvous_acked(&self) {
        self.rendezvous_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rendezvous_unblocked(&self) {
        self.rendezvous_unblocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments checkpoints forced by an UNBLOCK.
    pub fn increment_unblock_checkpoints(&self) {
        self.unblock_checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_control_antimessages_sent(&self) {
        self.control_antimessages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments rollbacks caused by a ROLLBACK control antimessage.
    pub fn increment_control_rollbacks(&self) {
        self.control_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_unmatched_rollbacks(&self) {
        self.unmatched_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_late_notifications(&self) {
        self.late_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_group_votes(&self) {
        self.group_votes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_group_rollbacks(&self) {
        self.group_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_protocol_violations(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns snapshot of all metrics for testing/debugging.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rendezvous_started: self.rendezvous_started.load(Ordering::Relaxed),
            rendezvous_acked: self.rendezvous_acked.load(Ordering::Relaxed),
            rendezvous_unblocked: self.rendezvous_unblocked.load(Ordering::Relaxed),
            unblock_checkpoints: self.unblock_checkpoints.load(Ordering::Relaxed),
            control_antimessages_sent: self.control_antimessages_sent.load(Ordering::Relaxed),
            control_rollbacks: self.control_rollbacks.load(Ordering::Relaxed),
            unmatched_rollbacks: self.unmatched_rollbacks.load(Ordering::Relaxed),
            late_notifications: self.late_notifications.load(Ordering::Relaxed),
            group_votes: self.group_votes.load(Ordering::Relaxed),
            group_rollbacks: self.group_rollbacks.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub rendezvous_started: u64,
    pub rendezvous_acked: u64,
    pub rendezvous_unblocked: u64,
    pub unblock_checkpoints: u64,
    pub control_antimessages_sent: u64,
    pub control_rollbacks: u64,
    pub unmatched_rollbacks: u64,
    pub late_notifications: u64,
    pub group_votes: u64,
    pub group_rollbacks: u64,
    pub protocol_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let before = METRICS.snapshot();
        METRICS.increment_control_rollbacks();
        METRICS.increment_group_votes();
        let after = METRICS.snapshot();

        assert!(after.control_rollbacks > before.control_rollbacks);
        assert!(after.group_votes > before.group_votes);
    }

    #[test]
    fn fresh_metrics_are_zero() {
        assert_eq!(Metrics::new().snapshot(), MetricsSnapshot::default());
    }
}
