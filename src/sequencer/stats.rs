//! Sequencer statistics
//!
//! Shared across successive sequencer instances so counters survive a
//! checkpoint handoff.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Default)]
pub struct LedgerStats {
    /// Transfer requests accepted
    pub enqueued: AtomicU64,
    /// Requests refused because the journal append failed
    pub append_faults: AtomicU64,
    /// Records whose saga start was acknowledged
    pub dispatched: AtomicU64,
    /// Acks reporting an already running process
    pub redispatched: AtomicU64,
    /// Failed launch attempts (record requeued)
    pub dispatch_failures: AtomicU64,
    /// Successful handoffs to a successor instance
    pub checkpoints: AtomicU64,
    /// Checkpoint attempts the store rejected
    pub checkpoint_faults: AtomicU64,
    /// Sequencer instances started, the first one included
    pub instances_started: AtomicU64,
}

impl LedgerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_append_faults(&self) {
        self.append_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_redispatched(&self) {
        self.redispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_dispatch_failures(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_checkpoints(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_checkpoint_faults(&self) {
        self.checkpoint_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_instances(&self) {
        self.instances_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LedgerStatsSnapshot {
        LedgerStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            append_faults: self.append_faults.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            redispatched: self.redispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            checkpoint_faults: self.checkpoint_faults.load(Ordering::Relaxed),
            instances_started: self.instances_started.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stats (for reporting)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct LedgerStatsSnapshot {
    pub enqueued: u64,
    pub append_faults: u64,
    pub dispatched: u64,
    pub redispatched: u64,
    pub dispatch_failures: u64,
    pub checkpoints: u64,
    pub checkpoint_faults: u64,
    pub instances_started: u64,
}

impl std::fmt::Display for LedgerStatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ledger Stats: enqueued={} (append_faults={}), dispatched={} (redispatched={}), dispatch_failures={}, checkpoints={} (faults={}), instances={}",
            self.enqueued,
            self.append_faults,
            self.dispatched,
            self.redispatched,
            self.dispatch_failures,
            self.checkpoints,
            self.checkpoint_faults,
            self.instances_started
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = LedgerStats::new();
        stats.incr_enqueued();
        stats.incr_enqueued();
        stats.incr_dispatched();
        stats.incr_checkpoints();

        let snap = stats.snapshot();
        assert_eq!(snap.enqueued, 2);
        assert_eq!(snap.dispatched, 1);
        assert_eq!(snap.checkpoints, 1);
        assert!(snap.to_string().contains("enqueued=2"));
    }
}
