//! Startup checks for stitchd
//!
//! Runs before the controller starts:
//! - output root creation (fatal on failure)
//! - stitcher and exiftool availability probes (warnings only)

use crate::config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot create output directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} not available")]
    ToolUnavailable(String),
}

/// Create the output root (and parents) if it does not exist yet.
pub fn prepare_output_root(path: &Path) -> Result<(), StartupError> {
    fs::create_dir_all(path).map_err(|source| StartupError::CreateDir {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), stage = "startup", "output directory ready");
    Ok(())
}

/// Check that `program` can be launched.
///
/// Only the spawn matters: some front ends exit non-zero for their own help
/// flag, which still proves they are installed.
pub fn check_tool_available(program: &Path, probe_arg: &str) -> Result<(), StartupError> {
    Command::new(program)
        .arg(probe_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
        .map_err(|e| {
            StartupError::ToolUnavailable(format!(
                "{} ({}); is it installed and in PATH?",
                program.display(),
                e
            ))
        })
}

/// Log the effective configuration once at startup.
pub fn log_config(cfg: &Config, input_root: &Path, output_root: &Path) {
    info!(
        input = %input_root.display(),
        output = %output_root.display(),
        acceleration = cfg.enable_acceleration,
        video_size = %format!("{}x{}", cfg.output_width, cfg.output_height),
        bitrate = cfg.bitrate,
        max_concurrent_jobs = cfg.max_concurrent_jobs,
        watch_interval_seconds = cfg.watch_interval_seconds,
        "configuration loaded"
    );
}

/// Probe the external tools. Missing tools are logged, never fatal: each
/// job fails on its own and is retried on the next scan.
///
/// Returns the number of tools that could not be launched.
pub fn run_startup_checks(stitcher: &Path, exiftool: &Path) -> usize {
    let probes = [(stitcher, "-help"), (exiftool, "-ver")];

    probes
        .iter()
        .filter(|(program, arg)| match check_tool_available(program, arg) {
            Ok(()) => false,
            Err(e) => {
                warn!(stage = "startup", error = %e, "external tool probe failed");
                true
            }
        })
        .count()
}
