//! Stitching collaborator: turns raw dual-lens captures into equirectangular output.

pub mod sdk_cli;

pub use sdk_cli::{build_image_command, build_video_command, parse_progress_line, SdkCliStitcher};

use crate::config::Config;
use crate::resolution::ResolutionProfile;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for stitching operations
#[derive(Debug, Error)]
pub enum StitchError {
    /// Stitcher exited with non-zero status
    #[error("stitcher failed with exit code: {0}")]
    Failed(i32),

    /// Stitcher was terminated by signal
    #[error("stitcher was terminated by signal")]
    Terminated,

    /// The stitcher could not be started or talked to
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StitchError {
    /// True when the stitcher ran and only its exit status reports a problem.
    ///
    /// For video jobs such a status is advisory; the output file decides.
    pub fn is_status_only(&self) -> bool {
        matches!(self, StitchError::Failed(_) | StitchError::Terminated)
    }
}

/// Stitch mode used by both video and image paths.
pub const STITCH_TYPE: &str = "template";

/// Image processing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelType {
    Cpu,
    Gpu,
}

impl AccelType {
    pub fn as_arg(self) -> &'static str {
        match self {
            AccelType::Cpu => "cpu",
            AccelType::Gpu => "gpu",
        }
    }
}

/// Everything the stitcher needs for one video.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStitchRequest {
    pub inputs: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub bitrate: u64,
    pub enable_acceleration: bool,
    pub stabilization: bool,
    pub direction_lock: bool,
    pub h265: bool,
}

impl VideoStitchRequest {
    /// Video request at the configured raster size, bitrate and acceleration.
    ///
    /// Stabilization and direction lock are always on; H.265 is preferred.
    pub fn from_config(input: &Path, output_path: &Path, config: &Config) -> Self {
        Self {
            inputs: vec![input.to_path_buf()],
            output_path: output_path.to_path_buf(),
            width: config.output_width,
            height: config.output_height,
            bitrate: config.bitrate,
            enable_acceleration: config.enable_acceleration,
            stabilization: true,
            direction_lock: true,
            h265: true,
        }
    }
}

/// Everything the stitcher needs for one still image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageStitchRequest {
    pub inputs: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub enable_acceleration: bool,
    pub accel: AccelType,
    pub fusion: bool,
}

impl ImageStitchRequest {
    /// Image request at the resolved raster size. Fusion stays off.
    pub fn new(
        input: &Path,
        output_path: &Path,
        profile: &ResolutionProfile,
        enable_acceleration: bool,
    ) -> Self {
        Self {
            inputs: vec![input.to_path_buf()],
            output_path: output_path.to_path_buf(),
            width: profile.width,
            height: profile.height,
            enable_acceleration,
            accel: if enable_acceleration {
                AccelType::Gpu
            } else {
                AccelType::Cpu
            },
            fusion: false,
        }
    }
}

/// Progress event reported while a video stitches. Observational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchProgress {
    Percent(u8),
    Error(i32),
}

/// Narrow surface of the stitching engine the core relies on.
pub trait Stitcher: Send + Sync {
    /// Stitch a video, blocking until the engine is done.
    fn stitch_video(
        &self,
        request: &VideoStitchRequest,
        on_progress: &mut dyn FnMut(StitchProgress),
    ) -> Result<(), StitchError>;

    /// Stitch a still image synchronously. `Ok(false)` means the engine
    /// declined or failed without an error of its own.
    fn stitch_image(&self, request: &ImageStitchRequest) -> Result<bool, StitchError>;
}
