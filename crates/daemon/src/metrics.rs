//! Run statistics for stitchd
//!
//! Counters shared by the scanner and workers, summarized when a run stops.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters, updated lock-free from any task.
#[derive(Debug, Default)]
pub struct RunStats {
    scans: AtomicU64,
    discovered: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    metadata_warnings: AtomicU64,
}

/// Shared stats handle
pub type SharedStats = Arc<RunStats>;

/// Point-in-time copy of [`RunStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub scans: u64,
    pub discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub metadata_warnings: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scan(&self, enqueued: usize) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.discovered.fetch_add(enqueued as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A job converted but its panorama tags could not be written
    pub fn record_metadata_warning(&self) {
        self.metadata_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            scans: self.scans.load(Ordering::Relaxed),
            discovered: self.discovered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            metadata_warnings: self.metadata_warnings.load(Ordering::Relaxed),
        }
    }
}

/// Creates a new SharedStats instance with zeroed counters
pub fn new_shared_stats() -> SharedStats {
    Arc::new(RunStats::new())
}
