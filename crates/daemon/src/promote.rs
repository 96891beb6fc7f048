//! Staged output handling.
//!
//! The stitcher writes to a hidden sibling of the final output. Only after
//! the staged file is complete (and tagged, for images) is it moved onto the
//! final path, so the completion oracle never sees a half-written output.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while promoting a staged output.
#[derive(Debug, Error)]
pub enum PromoteError {
    /// The staged file does not exist.
    #[error("staged output missing: {}", .0.display())]
    Missing(PathBuf),

    /// Neither rename nor copy could place the file.
    #[error("failed to move staged output into place: {0}")]
    MoveFailed(std::io::Error),
}

/// Hidden staging path next to `final_path`: `dir/.name.partial.ext`.
///
/// ```
/// use std::path::Path;
/// use stitchd::promote::staging_path;
///
/// let staged = staging_path(Path::new("/out/2024/VID_001.mp4"));
/// assert_eq!(staged, Path::new("/out/2024/.VID_001.partial.mp4"));
/// ```
pub fn staging_path(final_path: &Path) -> PathBuf {
    let stem = final_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let name = match final_path.extension() {
        Some(ext) => format!(".{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.partial", stem),
    };

    final_path.with_file_name(name)
}

/// Remove a staged file left behind by an interrupted run.
///
/// Returns whether something was removed.
pub fn clear_stale(staged: &Path) -> std::io::Result<bool> {
    match fs::remove_file(staged) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Move `staged` onto `final_path`.
///
/// Tries a rename first (same filesystem) and falls back to copy and remove.
/// On copy failure any partial destination is removed and the staged file is
/// left for inspection.
pub fn promote(staged: &Path, final_path: &Path) -> Result<(), PromoteError> {
    if !staged.is_file() {
        return Err(PromoteError::Missing(staged.to_path_buf()));
    }

    if fs::rename(staged, final_path).is_ok() {
        return Ok(());
    }

    if let Err(e) = fs::copy(staged, final_path) {
        let _ = fs::remove_file(final_path);
        return Err(PromoteError::MoveFailed(e));
    }
    // Final file is in place; a leftover staged copy is cleared on the next attempt
    let _ = fs::remove_file(staged);

    Ok(())
}
