//! Completion oracle: decides whether a capture file has already been converted.
//!
//! There is no ledger. The expected artifact in the output tree is the only
//! proof of completion, so a crash mid-job simply leaves that input to be
//! rediscovered by the next scan.

use crate::jobs::JobKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why an input could not be mapped to an output path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// The extension is not one of the recognized capture extensions.
    #[error("not a capture file: {}", .0.display())]
    Unsupported(PathBuf),

    /// The input does not live under the configured input root.
    #[error("{} is outside input root {}", .path.display(), .root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// Completion state of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The expected output exists.
    Converted,
    /// No output yet; the input needs a job.
    Pending,
    /// Not a capture file. Nothing to do, treated as satisfied.
    NotConvertible,
}

/// Maps input paths to output paths and checks the output tree.
#[derive(Debug, Clone)]
pub struct CompletionOracle {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl CompletionOracle {
    pub fn new(input_root: PathBuf, output_root: PathBuf) -> Self {
        Self {
            input_root,
            output_root,
        }
    }

    pub fn input_root(&self) -> &Path {
        &self.input_root
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Derive the deterministic output path for a capture file.
    ///
    /// `<input_root>/<sub>/<stem>.<ext>` maps to
    /// `<output_root>/<sub>/<stem>.<mp4|jpg>`.
    pub fn output_path_for(&self, input: &Path) -> Result<PathBuf, MappingError> {
        let kind = JobKind::from_path(input)
            .ok_or_else(|| MappingError::Unsupported(input.to_path_buf()))?;
        let relative =
            input
                .strip_prefix(&self.input_root)
                .map_err(|_| MappingError::OutsideRoot {
                    path: input.to_path_buf(),
                    root: self.input_root.clone(),
                })?;

        Ok(self
            .output_root
            .join(relative)
            .with_extension(kind.output_extension()))
    }

    /// Completion state for `input`.
    ///
    /// A path that cannot be placed relative to the input root is reported
    /// as `Pending`, never as done.
    pub fn status(&self, input: &Path) -> Completion {
        match self.output_path_for(input) {
            Ok(output) if output.exists() => Completion::Converted,
            Ok(_) => Completion::Pending,
            Err(MappingError::Unsupported(_)) => Completion::NotConvertible,
            Err(MappingError::OutsideRoot { .. }) => Completion::Pending,
        }
    }

    /// True when no job is needed for `input`.
    pub fn is_converted(&self, input: &Path) -> bool {
        !matches!(self.status(input), Completion::Pending)
    }
}
