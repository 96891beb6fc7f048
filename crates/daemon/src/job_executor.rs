//! Job executor and worker loop for stitchd
//!
//! Each worker pulls one job at a time from the shared queue and runs it
//! through the stitch pipeline on the blocking pool:
//! 1. Clear any stale staged output from an interrupted run
//! 2. Stitch into the staged path (video or image)
//! 3. Check the staged output exists
//! 4. Stamp panorama metadata (images only, failure is a warning)
//! 5. Promote the staged file onto the final output path

use crate::config::Config;
use crate::jobs::{ConversionJob, JobKind};
use crate::metadata::MetadataService;
use crate::metrics::SharedStats;
use crate::promote::{clear_stale, promote, staging_path, PromoteError};
use crate::queue::JobQueue;
use crate::resolution;
use crate::stitch::{ImageStitchRequest, StitchError, StitchProgress, Stitcher, VideoStitchRequest};
use crate::concurrency::RunFlag;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How long an idle worker waits for a push before checking the queue again.
pub const IDLE_WAIT: Duration = Duration::from_secs(1);

/// Error type for job execution operations
#[derive(Debug, Error)]
pub enum JobError {
    /// The stitcher could not be run
    #[error("stitch failed: {0}")]
    Stitch(#[from] StitchError),

    /// The image stitcher reported failure
    #[error("stitcher reported failure")]
    StitchRejected,

    /// The stitcher finished but left no output
    #[error("output file not created: {}", .0.display())]
    OutputMissing(PathBuf),

    /// Preparing the output location failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Moving the staged output into place failed
    #[error("promote failed: {0}")]
    Promote(#[from] PromoteError),

    /// The blocking task panicked
    #[error("job task panicked: {0}")]
    Panicked(String),
}

/// Successful job result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Output written (and tagged, for images)
    Converted,
    /// Image written but its panorama tags could not be stamped
    ConvertedWithoutMetadata,
}

/// Runs conversion jobs against the stitching and metadata collaborators.
pub struct JobExecutor {
    stitcher: Arc<dyn Stitcher>,
    metadata: Arc<dyn MetadataService>,
    config: Config,
    stats: SharedStats,
}

impl JobExecutor {
    pub fn new(
        stitcher: Arc<dyn Stitcher>,
        metadata: Arc<dyn MetadataService>,
        config: Config,
        stats: SharedStats,
    ) -> Self {
        Self {
            stitcher,
            metadata,
            config,
            stats,
        }
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Execute a job on the blocking pool and record the result.
    ///
    /// Failures are logged with the input path; the job is not retried here.
    /// Its output does not exist, so the next scan picks it up again.
    pub async fn execute(self: &Arc<Self>, job: ConversionJob) -> Result<JobOutcome, JobError> {
        let input = job.input_path().to_path_buf();
        let kind = job.kind();
        let job_id = job.id().to_string();
        let started = Instant::now();
        info!(job_id = %job_id, path = %input.display(), kind = %kind, stage = "stitch", "processing");

        let this = Arc::clone(self);
        let result = tokio::task::spawn_blocking(move || this.execute_blocking(&job))
            .await
            .unwrap_or_else(|join_err| Err(JobError::Panicked(join_err.to_string())));

        match &result {
            Ok(outcome) => {
                self.stats.record_completed();
                if *outcome == JobOutcome::ConvertedWithoutMetadata {
                    self.stats.record_metadata_warning();
                }
                info!(
                    job_id = %job_id,
                    path = %input.display(),
                    kind = %kind,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "conversion completed"
                );
            }
            Err(e) => {
                self.stats.record_failed();
                error!(
                    job_id = %job_id,
                    path = %input.display(),
                    kind = %kind,
                    stage = "stitch",
                    error = %e,
                    "conversion failed, will retry on next scan"
                );
            }
        }

        result
    }

    /// Run the whole pipeline for one job on the current thread.
    pub fn execute_blocking(&self, job: &ConversionJob) -> Result<JobOutcome, JobError> {
        let output = job.output_path();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let staged = staging_path(output);
        if clear_stale(&staged)? {
            debug!(path = %staged.display(), "removed stale staged output");
        }

        let result = match job.kind() {
            JobKind::Video => self.stitch_video(job.input_path(), &staged),
            JobKind::Image => self.stitch_image(job.input_path(), &staged),
        };

        match result {
            Ok(outcome) => {
                promote(&staged, output)?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = clear_stale(&staged);
                Err(e)
            }
        }
    }

    fn stitch_video(&self, input: &Path, staged: &Path) -> Result<JobOutcome, JobError> {
        let request = VideoStitchRequest::from_config(input, staged, &self.config);
        let mut on_progress = |progress: StitchProgress| match progress {
            StitchProgress::Percent(p) => debug!(path = %input.display(), percent = p, "stitch progress"),
            StitchProgress::Error(code) => {
                warn!(path = %input.display(), stage = "stitch", code, "stitcher reported error")
            }
        };

        match self.stitcher.stitch_video(&request, &mut on_progress) {
            Ok(()) => {}
            // Exit status is advisory for video; the output file decides
            Err(e) if e.is_status_only() => {
                warn!(path = %input.display(), stage = "stitch", error = %e, "stitcher exited unsuccessfully");
            }
            Err(e) => return Err(e.into()),
        }

        if !staged.is_file() {
            return Err(JobError::OutputMissing(staged.to_path_buf()));
        }
        Ok(JobOutcome::Converted)
    }

    fn stitch_image(&self, input: &Path, staged: &Path) -> Result<JobOutcome, JobError> {
        let profile = resolution::detect(self.metadata.as_ref(), input);
        let request =
            ImageStitchRequest::new(input, staged, &profile, self.config.enable_acceleration);

        if !self.stitcher.stitch_image(&request)? {
            return Err(JobError::StitchRejected);
        }
        if !staged.is_file() {
            return Err(JobError::OutputMissing(staged.to_path_buf()));
        }

        match self
            .metadata
            .write_panorama_tags(staged, input, profile.width, profile.height)
        {
            Ok(()) => Ok(JobOutcome::Converted),
            Err(e) => {
                warn!(
                    path = %input.display(),
                    stage = "metadata",
                    error = %e,
                    "panorama metadata not written, keeping image"
                );
                Ok(JobOutcome::ConvertedWithoutMetadata)
            }
        }
    }
}

/// Worker loop: one job at a time until `running` is cleared.
///
/// A job already dequeued always runs to completion; the flag is only checked
/// between jobs.
pub async fn run_worker(
    id: u32,
    queue: Arc<JobQueue>,
    executor: Arc<JobExecutor>,
    running: RunFlag,
) {
    debug!(worker = id, "worker started");

    while running.is_running() {
        let Some(lease) = queue.try_pop() else {
            tokio::select! {
                _ = queue.wait_for_job(IDLE_WAIT) => {}
                _ = running.stopped() => {}
            }
            continue;
        };

        let job = lease.job().clone();
        // Result is logged and counted by execute
        let _ = executor.execute(job).await;
        drop(lease);
    }

    debug!(worker = id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataError, TagAssignment, TagMap};
    use crate::metrics::new_shared_stats;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Behavior {
        Write,
        WriteThenExitNonZero,
        ExitNonZero,
        SpawnFails,
        Decline,
    }

    struct FakeStitcher {
        behavior: Behavior,
        video_requests: Mutex<Vec<VideoStitchRequest>>,
        image_requests: Mutex<Vec<ImageStitchRequest>>,
    }

    impl FakeStitcher {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                video_requests: Mutex::new(Vec::new()),
                image_requests: Mutex::new(Vec::new()),
            }
        }

        fn run(&self, output: &Path) -> Result<bool, StitchError> {
            match self.behavior {
                Behavior::Write => {
                    fs::write(output, b"stitched")?;
                    Ok(true)
                }
                Behavior::WriteThenExitNonZero => {
                    fs::write(output, b"stitched")?;
                    Err(StitchError::Failed(1))
                }
                Behavior::ExitNonZero => Err(StitchError::Failed(2)),
                Behavior::SpawnFails => Err(StitchError::Io(std::io::Error::other("no binary"))),
                Behavior::Decline => {
                    fs::write(output, b"partial")?;
                    Ok(false)
                }
            }
        }
    }

    impl Stitcher for FakeStitcher {
        fn stitch_video(
            &self,
            request: &VideoStitchRequest,
            on_progress: &mut dyn FnMut(StitchProgress),
        ) -> Result<(), StitchError> {
            self.video_requests.lock().unwrap().push(request.clone());
            on_progress(StitchProgress::Percent(50));
            self.run(&request.output_path).map(|_| ())
        }

        fn stitch_image(&self, request: &ImageStitchRequest) -> Result<bool, StitchError> {
            self.image_requests.lock().unwrap().push(request.clone());
            self.run(&request.output_path)
        }
    }

    struct FakeMetadata {
        model: &'static str,
        fail_writes: bool,
        applied: Mutex<Vec<(PathBuf, Vec<TagAssignment>)>>,
    }

    impl FakeMetadata {
        fn new(model: &'static str, fail_writes: bool) -> Self {
            Self {
                model,
                fail_writes,
                applied: Mutex::new(Vec::new()),
            }
        }
    }

    impl MetadataService for FakeMetadata {
        fn read_tags(&self, _path: &Path) -> Result<TagMap, MetadataError> {
            let mut tags = TagMap::new();
            tags.insert("Model".to_string(), self.model.to_string());
            Ok(tags)
        }

        fn apply_tags(
            &self,
            path: &Path,
            assignments: &[TagAssignment],
        ) -> Result<(), MetadataError> {
            if self.fail_writes {
                return Err(MetadataError::ToolFailed("read-only".to_string()));
            }
            self.applied
                .lock()
                .unwrap()
                .push((path.to_path_buf(), assignments.to_vec()));
            Ok(())
        }
    }

    struct Fixture {
        _temp: TempDir,
        input: PathBuf,
        output: PathBuf,
    }

    fn fixture(kind: JobKind) -> Fixture {
        let temp = TempDir::new().unwrap();
        let ext = match kind {
            JobKind::Video => "insv",
            JobKind::Image => "insp",
        };
        let input = temp.path().join("in").join(format!("capture.{}", ext));
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        fs::write(&input, b"raw").unwrap();
        let output = temp
            .path()
            .join("out")
            .join("nested")
            .join(format!("capture.{}", kind.output_extension()));
        Fixture {
            _temp: temp,
            input,
            output,
        }
    }

    fn executor(
        stitcher: Arc<FakeStitcher>,
        metadata: Arc<FakeMetadata>,
    ) -> Arc<JobExecutor> {
        Arc::new(JobExecutor::new(
            stitcher,
            metadata,
            Config::default(),
            new_shared_stats(),
        ))
    }

    fn job(f: &Fixture, kind: JobKind) -> ConversionJob {
        ConversionJob::new(f.input.clone(), f.output.clone(), kind)
    }

    #[tokio::test]
    async fn test_video_success_promotes_staged_output() {
        let f = fixture(JobKind::Video);
        let stitcher = Arc::new(FakeStitcher::new(Behavior::Write));
        let exec = executor(stitcher.clone(), Arc::new(FakeMetadata::new("Insta360 X3", false)));

        let outcome = exec.execute(job(&f, JobKind::Video)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Converted);
        assert_eq!(fs::read(&f.output).unwrap(), b"stitched");
        assert!(!staging_path(&f.output).exists());

        let requests = stitcher.video_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].output_path, staging_path(&f.output));
        assert_eq!((requests[0].width, requests[0].height), (5760, 2880));
        assert_eq!(exec.stats().summary().completed, 1);
    }

    #[tokio::test]
    async fn test_video_exit_status_is_advisory() {
        let f = fixture(JobKind::Video);
        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::WriteThenExitNonZero)),
            Arc::new(FakeMetadata::new("", false)),
        );

        let outcome = exec.execute(job(&f, JobKind::Video)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Converted);
        assert!(f.output.exists());
    }

    #[tokio::test]
    async fn test_video_without_output_fails() {
        let f = fixture(JobKind::Video);
        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::ExitNonZero)),
            Arc::new(FakeMetadata::new("", false)),
        );

        let result = exec.execute(job(&f, JobKind::Video)).await;

        assert!(matches!(result, Err(JobError::OutputMissing(_))));
        assert!(!f.output.exists());
        assert_eq!(exec.stats().summary().failed, 1);
    }

    #[tokio::test]
    async fn test_stitcher_spawn_failure_fails_job() {
        let f = fixture(JobKind::Video);
        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::SpawnFails)),
            Arc::new(FakeMetadata::new("", false)),
        );

        let result = exec.execute(job(&f, JobKind::Video)).await;
        assert!(matches!(result, Err(JobError::Stitch(StitchError::Io(_)))));
    }

    #[tokio::test]
    async fn test_image_uses_resolved_profile_and_stamps_metadata() {
        let f = fixture(JobKind::Image);
        let stitcher = Arc::new(FakeStitcher::new(Behavior::Write));
        let metadata = Arc::new(FakeMetadata::new("Insta360 X3", false));
        let exec = executor(stitcher.clone(), metadata.clone());

        let outcome = exec.execute(job(&f, JobKind::Image)).await.unwrap();

        assert_eq!(outcome, JobOutcome::Converted);
        assert!(f.output.exists());

        let requests = stitcher.image_requests.lock().unwrap();
        assert_eq!((requests[0].width, requests[0].height), (11520, 5760));

        let applied = metadata.applied.lock().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, staging_path(&f.output));
        assert!(applied[0]
            .1
            .iter()
            .any(|a| a.key == "XMP-GPano:FullPanoWidthPixels" && a.value == "11520"));
    }

    #[tokio::test]
    async fn test_image_metadata_failure_keeps_output() {
        let f = fixture(JobKind::Image);
        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::Write)),
            Arc::new(FakeMetadata::new("Insta360 X4", true)),
        );

        let outcome = exec.execute(job(&f, JobKind::Image)).await.unwrap();

        assert_eq!(outcome, JobOutcome::ConvertedWithoutMetadata);
        assert!(f.output.exists());
        let summary = exec.stats().summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.metadata_warnings, 1);
    }

    #[tokio::test]
    async fn test_image_declined_even_with_file_fails() {
        let f = fixture(JobKind::Image);
        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::Decline)),
            Arc::new(FakeMetadata::new("", false)),
        );

        let result = exec.execute(job(&f, JobKind::Image)).await;

        assert!(matches!(result, Err(JobError::StitchRejected)));
        assert!(!f.output.exists());
        assert!(!staging_path(&f.output).exists());
    }

    #[test]
    fn test_stale_staged_output_is_replaced() {
        let f = fixture(JobKind::Video);
        fs::create_dir_all(f.output.parent().unwrap()).unwrap();
        fs::write(staging_path(&f.output), b"half written").unwrap();

        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::ExitNonZero)),
            Arc::new(FakeMetadata::new("", false)),
        );
        let result = exec.execute_blocking(&job(&f, JobKind::Video));

        // Stale file must not count as this run's output
        assert!(matches!(result, Err(JobError::OutputMissing(_))));
        assert!(!f.output.exists());
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_stops() {
        let f = fixture(JobKind::Video);
        let queue = Arc::new(JobQueue::new());
        queue.push(job(&f, JobKind::Video));

        let exec = executor(
            Arc::new(FakeStitcher::new(Behavior::Write)),
            Arc::new(FakeMetadata::new("", false)),
        );
        let running = RunFlag::new();
        let handle = tokio::spawn(run_worker(0, queue.clone(), exec, running.clone()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while !queue.is_idle() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(queue.is_idle());
        assert!(f.output.exists());

        running.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should exit after stop")
            .unwrap();
    }
}
