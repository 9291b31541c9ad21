//! Relay statistics
//!
//! Counters updated by the relay loop and readable from anywhere.

use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Statistics for the session relay
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Sessions currently relaying
    pub active: AtomicUsize,
    /// Client connections accepted
    pub total_accepted: AtomicUsize,
    /// Sessions that reached the relaying state
    pub total_established: AtomicUsize,
    /// Sessions torn down
    pub total_closed: AtomicUsize,
    /// Bridge connects that failed
    pub connect_failures: AtomicUsize,
}

impl RelayStats {
    /// Create new relay stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted client connection
    pub fn record_accepted(&self) {
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a session entering the active set
    pub fn record_established(&self) {
        self.total_established.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a session leaving the active set
    pub fn record_closed(&self) {
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record a failed bridge connect
    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current stats snapshot
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            active: self.active.load(Ordering::SeqCst),
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_established: self.total_established.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
        }
    }

    /// Log a one-line summary
    pub fn log_summary(&self) {
        let stats = self.snapshot();
        debug!(
            "Relay: active={}, accepted={}, established={}, closed={}, connect_failures={}",
            stats.active,
            stats.total_accepted,
            stats.total_established,
            stats.total_closed,
            stats.connect_failures
        );
    }
}

/// Snapshot of relay statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct RelayStatsSnapshot {
    pub active: usize,
    pub total_accepted: usize,
    pub total_established: usize,
    pub total_closed: usize,
    pub connect_failures: usize,
}
