//! Conversion job model.
//!
//! A job is created by the scanner for one unconverted capture file and is
//! consumed exactly once by a worker. Jobs are never persisted; the output
//! tree is the only record of completed work.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// Capture file extensions recognized by the scanner (matched case-insensitively).
pub const CAPTURE_EXTENSIONS: &[&str] = &["insv", "insp"];

/// Kind of capture, derived from the input extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Motion capture (`.insv`), stitched into an `.mp4`.
    Video,
    /// Still capture (`.insp`), stitched into a `.jpg`.
    Image,
}

impl JobKind {
    /// Classify a path by its extension, ignoring case.
    ///
    /// Returns `None` for anything that is not a capture file.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "insv" => Some(JobKind::Video),
            "insp" => Some(JobKind::Image),
            _ => None,
        }
    }

    /// Extension (without the dot) of the artifact produced for this kind.
    pub fn output_extension(self) -> &'static str {
        match self {
            JobKind::Video => "mp4",
            JobKind::Image => "jpg",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Video => "video",
            JobKind::Image => "image",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One discovered unit of work. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    id: String,
    input_path: PathBuf,
    output_path: PathBuf,
    kind: JobKind,
    created_at: SystemTime,
}

impl ConversionJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf, kind: JobKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            output_path,
            kind,
            created_at: SystemTime::now(),
        }
    }

    /// Diagnostic identifier, unique per discovery.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Discovery time. Diagnostics only, never used for correctness.
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}
