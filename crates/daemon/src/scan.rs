//! Scanner module for discovering unconverted capture files.
//!
//! Walks the input tree, keeps files with a capture extension, drops the ones
//! the completion oracle reports as converted and turns the rest into
//! conversion jobs.

use crate::completion::CompletionOracle;
use crate::concurrency::RunFlag;
use crate::jobs::{ConversionJob, JobKind};
use crate::queue::{JobQueue, PushOutcome};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Checks if a file has a capture extension (case-insensitive).
pub fn is_capture_file(path: &Path) -> bool {
    JobKind::from_path(path).is_some()
}

/// Counters for one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Capture files seen in the tree
    pub candidates: usize,
    /// New jobs pushed onto the queue
    pub enqueued: usize,
    /// Candidates whose output already exists
    pub already_converted: usize,
    /// Candidates with a job already queued or in flight
    pub in_flight: usize,
    /// Entries that could not be read or mapped
    pub errors: usize,
}

enum Candidate {
    New(ConversionJob),
    Converted,
    Unmappable,
}

/// Recursive capture scanner over one input root.
#[derive(Debug, Clone)]
pub struct Scanner {
    oracle: CompletionOracle,
}

impl Scanner {
    pub fn new(oracle: CompletionOracle) -> Self {
        Self { oracle }
    }

    pub fn oracle(&self) -> &CompletionOracle {
        &self.oracle
    }

    /// Lazily enumerate capture files under the input root, in filesystem order.
    ///
    /// Symlinks are followed, so linked captures and directories count like
    /// regular ones. Unreadable entries (including link loops) are logged and
    /// skipped. A missing root yields nothing.
    pub fn captures(&self) -> Box<dyn Iterator<Item = PathBuf> + '_> {
        let root = self.oracle.input_root();
        if !root.is_dir() {
            warn!(path = %root.display(), stage = "scan", "input directory does not exist");
            return Box::new(std::iter::empty());
        }

        let walker = WalkDir::new(root).follow_links(true).into_iter();

        Box::new(
            walker
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(
                            path = ?e.path(),
                            stage = "scan",
                            error = %e,
                            "skipping unreadable entry"
                        );
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_capture_file(path)),
        )
    }

    /// Lazily produce jobs for capture files that have no output yet.
    pub fn discover(&self) -> impl Iterator<Item = ConversionJob> + '_ {
        self.captures().filter_map(move |path| match self.classify(&path) {
            Candidate::New(job) => Some(job),
            Candidate::Converted | Candidate::Unmappable => None,
        })
    }

    fn classify(&self, path: &Path) -> Candidate {
        if self.oracle.is_converted(path) {
            return Candidate::Converted;
        }
        let output = match self.oracle.output_path_for(path) {
            Ok(output) => output,
            Err(e) => {
                warn!(path = %path.display(), stage = "scan", error = %e, "cannot map output path");
                return Candidate::Unmappable;
            }
        };
        match JobKind::from_path(path) {
            Some(kind) => Candidate::New(ConversionJob::new(path.to_path_buf(), output, kind)),
            None => Candidate::Converted,
        }
    }

    /// One scan pass that pushes every new job onto `queue`.
    ///
    /// The oracle and the queue's in-flight set are both consulted before a
    /// job is pushed. The pass ends early if `running` is cleared.
    pub fn scan_into(&self, queue: &JobQueue, running: &RunFlag) -> ScanReport {
        let mut report = ScanReport::default();

        for path in self.captures() {
            if !running.is_running() {
                debug!(stage = "scan", "stop requested, ending scan pass");
                break;
            }
            report.candidates += 1;

            if queue.is_tracked(&path) {
                report.in_flight += 1;
                continue;
            }

            match self.classify(&path) {
                Candidate::New(job) => match queue.push(job) {
                    PushOutcome::Queued => {
                        info!(path = %path.display(), stage = "scan", "added to queue");
                        report.enqueued += 1;
                    }
                    PushOutcome::AlreadyTracked => report.in_flight += 1,
                },
                Candidate::Converted => report.already_converted += 1,
                Candidate::Unmappable => report.errors += 1,
            }
        }

        report
    }
}
