//! Run controller for stitchd
//!
//! Owns the scan/drain lifecycle for both run modes:
//! - single run: scan once, wait for the queue to drain, stop
//! - watch: scan, sleep the configured interval, repeat until stopped
//!
//! Workers are started before the first scan so they consume while the scan
//! is still producing.

use crate::completion::CompletionOracle;
use crate::concurrency::{RunFlag, WorkerPlan};
use crate::config::Config;
use crate::job_executor::{run_worker, JobExecutor};
use crate::metadata::MetadataService;
use crate::metrics::{new_shared_stats, RunSummary, SharedStats};
use crate::queue::JobQueue;
use crate::scan::{ScanReport, Scanner};
use crate::stitch::Stitcher;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often a single run checks whether the queue has drained.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A scan or worker task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One-shot batch or continuous polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Single,
    Watch,
}

impl RunMode {
    /// Watch mode is on when requested on the command line or in the config.
    pub fn select(watch_flag: bool, config: &Config) -> Self {
        if watch_flag || config.watch_mode_enabled {
            RunMode::Watch
        } else {
            RunMode::Single
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Single => f.write_str("single"),
            RunMode::Watch => f.write_str("watch"),
        }
    }
}

/// Controller lifecycle.
///
/// Single run: `Idle -> Scanning -> Draining -> Stopped`.
/// Watch: `Idle -> Scanning -> WatchWaiting -> Scanning ...`, then `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Draining,
    WatchWaiting,
    Stopped,
}

/// Daemon state containing all runtime components
pub struct Daemon {
    config: Config,
    plan: WorkerPlan,
    scanner: Arc<Scanner>,
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    stats: SharedStats,
    running: RunFlag,
    state: watch::Sender<RunState>,
}

impl Daemon {
    /// Wire the controller for one input/output root pair.
    pub fn new(
        config: Config,
        input_root: PathBuf,
        output_root: PathBuf,
        stitcher: Arc<dyn Stitcher>,
        metadata: Arc<dyn MetadataService>,
    ) -> Self {
        let plan = WorkerPlan::derive(&config);
        Self::with_plan(config, plan, input_root, output_root, stitcher, metadata)
    }

    /// Same as [`Daemon::new`] with an explicit worker plan
    pub fn with_plan(
        config: Config,
        plan: WorkerPlan,
        input_root: PathBuf,
        output_root: PathBuf,
        stitcher: Arc<dyn Stitcher>,
        metadata: Arc<dyn MetadataService>,
    ) -> Self {
        let stats = new_shared_stats();
        let executor = Arc::new(JobExecutor::new(
            stitcher,
            metadata,
            config.clone(),
            stats.clone(),
        ));
        let (state, _) = watch::channel(RunState::Idle);

        Self {
            config,
            plan,
            scanner: Arc::new(Scanner::new(CompletionOracle::new(input_root, output_root))),
            queue: Arc::new(JobQueue::new()),
            executor,
            stats,
            running: RunFlag::new(),
            state,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn plan(&self) -> &WorkerPlan {
        &self.plan
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Handle for requesting a cooperative stop from another task.
    pub fn running_flag(&self) -> RunFlag {
        self.running.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RunState) {
        debug!(state = ?state, "controller state");
        self.state.send_replace(state);
    }

    /// One scan pass on the blocking pool.
    pub async fn scan_once(&self) -> Result<ScanReport, DaemonError> {
        let scanner = Arc::clone(&self.scanner);
        let queue = Arc::clone(&self.queue);
        let running = self.running.clone();

        let report = tokio::task::spawn_blocking(move || scanner.scan_into(&queue, &running)).await?;

        self.stats.record_scan(report.enqueued);
        info!(
            stage = "scan",
            candidates = report.candidates,
            enqueued = report.enqueued,
            already_converted = report.already_converted,
            in_flight = report.in_flight,
            errors = report.errors,
            queue_len = self.queue.size(),
            "scan pass finished"
        );
        Ok(report)
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.plan.workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.executor),
                    self.running.clone(),
                ))
            })
            .collect()
    }

    async fn shutdown(&self, workers: Vec<JoinHandle<()>>) -> Result<RunSummary, DaemonError> {
        self.running.stop();
        self.queue.wake_all();

        for worker in workers {
            worker.await?;
        }

        self.set_state(RunState::Stopped);
        let summary = self.stats.summary();
        info!(
            scans = summary.scans,
            discovered = summary.discovered,
            completed = summary.completed,
            failed = summary.failed,
            metadata_warnings = summary.metadata_warnings,
            abandoned = self.queue.size(),
            "run finished"
        );
        Ok(summary)
    }

    /// Scan once, wait until every queued job has been processed, stop.
    pub async fn run_single(&self) -> Result<RunSummary, DaemonError> {
        let workers = self.spawn_workers();

        self.set_state(RunState::Scanning);
        let scanned = self.scan_once().await;

        if scanned.is_ok() {
            self.set_state(RunState::Draining);
            while self.running.is_running() && !self.queue.is_idle() {
                tokio::select! {
                    _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
                    _ = self.running.stopped() => {}
                }
            }
        }

        let summary = self.shutdown(workers).await;
        scanned?;
        summary
    }

    /// Scan every `watchIntervalSeconds` until the running flag is cleared.
    pub async fn run_watch(&self) -> Result<RunSummary, DaemonError> {
        let interval = Duration::from_secs(self.config.watch_interval_seconds.max(1));
        info!(interval_secs = interval.as_secs(), "watch mode started");

        let workers = self.spawn_workers();
        let mut result = Ok(());

        while self.running.is_running() {
            self.set_state(RunState::Scanning);
            if let Err(e) = self.scan_once().await {
                result = Err(e);
                break;
            }

            self.set_state(RunState::WatchWaiting);
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.running.stopped() => {}
            }
        }

        let summary = self.shutdown(workers).await;
        result?;
        summary
    }

    pub async fn run(&self, mode: RunMode) -> Result<RunSummary, DaemonError> {
        info!(
            mode = %mode,
            workers = self.plan.workers,
            total_cores = self.plan.total_cores,
            "starting"
        );
        match mode {
            RunMode::Single => self.run_single().await,
            RunMode::Watch => self.run_watch().await,
        }
    }
}
