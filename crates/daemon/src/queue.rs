//! Shared FIFO of conversion jobs between the scanner and the workers.
//!
//! Besides the pending jobs the queue remembers every input path that is
//! queued or currently being processed. The scanner consults that set so a
//! file whose stitch is still running (and therefore has no output yet) is not
//! queued a second time. A path is released when the worker drops its
//! [`JobLease`].

use crate::jobs::ConversionJob;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

/// Result of [`JobQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// A job for the same input is already queued or in flight.
    AlreadyTracked,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: VecDeque<ConversionJob>,
    tracked: HashSet<PathBuf>,
}

/// Mutex-protected job queue. Every operation is a single short critical
/// section; the lock is never held across I/O or an await point.
#[derive(Debug, Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job unless its input is already queued or in flight.
    pub fn push(&self, job: ConversionJob) -> PushOutcome {
        {
            let mut state = self.lock();
            if !state.tracked.insert(job.input_path().to_path_buf()) {
                return PushOutcome::AlreadyTracked;
            }
            state.jobs.push_back(job);
        }
        self.notify.notify_one();
        PushOutcome::Queued
    }

    /// Dequeue the oldest job without blocking.
    ///
    /// The input stays tracked until the returned lease is dropped.
    pub fn try_pop(self: &Arc<Self>) -> Option<JobLease> {
        let job = self.lock().jobs.pop_front()?;
        Some(JobLease {
            job,
            queue: Arc::clone(self),
        })
    }

    /// Number of jobs waiting to be dequeued.
    pub fn size(&self) -> usize {
        self.lock().jobs.len()
    }

    /// Number of dequeued jobs whose lease is still alive.
    pub fn in_flight(&self) -> usize {
        let state = self.lock();
        state.tracked.len() - state.jobs.len()
    }

    /// True when nothing is queued and nothing is being processed.
    pub fn is_idle(&self) -> bool {
        self.lock().tracked.is_empty()
    }

    /// True when a job for `input` is queued or in flight.
    pub fn is_tracked(&self, input: &Path) -> bool {
        self.lock().tracked.contains(input)
    }

    /// Wait until a job is pushed or `timeout` elapses, whichever comes first.
    pub async fn wait_for_job(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Wake every idle waiter, e.g. on shutdown.
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    fn release(&self, input: &Path) {
        self.lock().tracked.remove(input);
    }
}

/// Exclusive ownership of a dequeued job.
///
/// Dropping the lease marks the input as no longer in flight.
#[derive(Debug)]
pub struct JobLease {
    job: ConversionJob,
    queue: Arc<JobQueue>,
}

impl JobLease {
    pub fn job(&self) -> &ConversionJob {
        &self.job
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.queue.release(self.job.input_path());
    }
}
