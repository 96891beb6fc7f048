//! stitchd
//!
//! Background service that discovers 360° camera captures, stitches each one
//! exactly once and stamps panorama metadata on the result. The output tree is
//! the only completion record: a capture whose output exists is done.

pub mod completion;
pub mod concurrency;
pub mod daemon;
pub mod job_executor;
pub mod jobs;
pub mod metadata;
pub mod metrics;
pub mod promote;
pub mod queue;
pub mod resolution;
pub mod scan;
pub mod startup;
pub mod stitch;

pub use stitchd_config as config;
pub use stitchd_config::{Config, ConfigStore};
pub use completion::{Completion, CompletionOracle, MappingError};
pub use concurrency::{RunFlag, WorkerPlan};
pub use daemon::{Daemon, DaemonError, RunMode, RunState};
pub use job_executor::{run_worker, JobError, JobExecutor, JobOutcome};
pub use jobs::{ConversionJob, JobKind};
pub use metadata::{ExifTool, MetadataError, MetadataService, TagMap};
pub use metrics::{new_shared_stats, RunStats, RunSummary, SharedStats};
pub use queue::{JobLease, JobQueue, PushOutcome};
pub use resolution::{ResolutionProfile, DEFAULT_PROFILE};
pub use scan::{ScanReport, Scanner};
pub use startup::{prepare_output_root, run_startup_checks, StartupError};
pub use stitch::{SdkCliStitcher, StitchError, Stitcher};
