//! Worker pool sizing and cooperative stop signalling.

use crate::config::Config;
use std::sync::Arc;
use tokio::sync::watch;

/// Worker pool plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Logical CPU cores available
    pub total_cores: u32,
    /// Number of workers pulling from the shared queue
    pub workers: u32,
}

impl WorkerPlan {
    /// Derive a worker plan from configuration
    ///
    /// `maxConcurrentJobs` is clamped to `[1, total_cores]`; 0 means 1.
    pub fn derive(cfg: &Config) -> Self {
        Self::with_cores(cfg, num_cpus::get() as u32)
    }

    /// Same as [`WorkerPlan::derive`] with an explicit core count
    pub fn with_cores(cfg: &Config, total_cores: u32) -> Self {
        let total_cores = total_cores.max(1);
        let workers = cfg.max_concurrent_jobs.clamp(1, total_cores);
        Self {
            total_cores,
            workers,
        }
    }
}

/// Shared running flag observed by the scan loop and every worker.
///
/// Stopping is cooperative: loops check the flag between iterations, so a
/// stitch already in progress always runs to completion.
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_running(&self) -> bool {
        *self.tx.borrow()
    }

    /// Clear the flag. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(false);
    }

    /// Resolves once [`RunFlag::stop`] has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|running| !*running).await;
    }
}
