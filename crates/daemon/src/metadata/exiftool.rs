//! ExifTool adapter for the metadata collaborator.
//!
//! Tags are read with `exiftool -j -n` and written in place with
//! `exiftool -overwrite_original -n -TAG=value ...`. Numeric (`-n`) values
//! are used in both directions so copied values round-trip unchanged.

use super::{MetadataError, MetadataService, TagAssignment, TagMap};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Metadata service backed by the `exiftool` binary.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl Default for ExifTool {
    fn default() -> Self {
        Self::new("exiftool")
    }
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build the read command for `path`.
    pub fn build_read_command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-j", "-n"]).arg(path);
        cmd
    }

    /// Build the in-place write command for `path`.
    pub fn build_write_command(&self, path: &Path, assignments: &[TagAssignment]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-overwrite_original", "-n"]);
        for assignment in assignments {
            cmd.arg(format!("-{}={}", assignment.key, assignment.value));
        }
        cmd.arg(path);
        cmd
    }
}

impl MetadataService for ExifTool {
    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError> {
        let output = self.build_read_command(path).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MetadataError::ToolFailed(format!(
                "exiftool exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_exiftool_json(&stdout)
    }

    fn apply_tags(&self, path: &Path, assignments: &[TagAssignment]) -> Result<(), MetadataError> {
        if assignments.is_empty() {
            return Ok(());
        }

        let output = self.build_write_command(path, assignments).output()?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(MetadataError::ToolFailed(format!(
                "exiftool exited with status {}: {}",
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// Parses `exiftool -j` output (an array with one object per file) into a tag map.
///
/// Only the first file is used. Scalar values are kept; nested values and
/// the `SourceFile` echo are dropped.
pub fn parse_exiftool_json(json_str: &str) -> Result<TagMap, MetadataError> {
    let parsed: Vec<serde_json::Map<String, Value>> =
        serde_json::from_str(json_str).map_err(|e| MetadataError::Parse(e.to_string()))?;

    let first = parsed
        .into_iter()
        .next()
        .ok_or_else(|| MetadataError::Parse("exiftool returned no entries".to_string()))?;

    let tags = first
        .into_iter()
        .filter(|(key, _)| key != "SourceFile")
        .filter_map(|(key, value)| {
            let text = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(true) => "True".to_string(),
                Value::Bool(false) => "False".to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => return None,
            };
            Some((key, text))
        })
        .collect();

    Ok(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn command_args(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    #[test]
    fn test_parse_scalar_tags() {
        let json = r#"[{
            "SourceFile": "/in/IMG_001.insp",
            "Make": "Arashi Vision",
            "Model": "Insta360 X3",
            "ExifImageWidth": 11968,
            "ExifImageHeight": 5984,
            "GPSLatitude": 48.8584,
            "UsePanoramaViewer": true,
            "Thumbnail": {"binary": true},
            "Keywords": ["a", "b"]
        }]"#;

        let tags = parse_exiftool_json(json).unwrap();

        assert_eq!(tags.get("Make").map(String::as_str), Some("Arashi Vision"));
        assert_eq!(tags.get("Model").map(String::as_str), Some("Insta360 X3"));
        assert_eq!(tags.get("ExifImageWidth").map(String::as_str), Some("11968"));
        assert_eq!(tags.get("GPSLatitude").map(String::as_str), Some("48.8584"));
        assert_eq!(tags.get("UsePanoramaViewer").map(String::as_str), Some("True"));
        assert!(!tags.contains_key("SourceFile"));
        assert!(!tags.contains_key("Thumbnail"));
        assert!(!tags.contains_key("Keywords"));
    }

    #[test]
    fn test_parse_rejects_garbage_and_empty() {
        assert!(matches!(
            parse_exiftool_json("not json"),
            Err(MetadataError::Parse(_))
        ));
        assert!(matches!(parse_exiftool_json("[]"), Err(MetadataError::Parse(_))));
    }

    #[test]
    fn test_read_command() {
        let tool = ExifTool::new("/usr/bin/exiftool");
        let cmd = tool.build_read_command(Path::new("/in/a.insp"));

        assert_eq!(cmd.get_program(), OsStr::new("/usr/bin/exiftool"));
        assert_eq!(command_args(&cmd), vec!["-j", "-n", "/in/a.insp"]);
    }

    #[test]
    fn test_write_command_puts_path_last() {
        let tool = ExifTool::default();
        let cmd = tool.build_write_command(
            Path::new("/out/a.jpg"),
            &[
                TagAssignment::new("XMP-GPano:ProjectionType", "equirectangular"),
                TagAssignment::new("ImageDescription", "360 degree panorama"),
            ],
        );

        assert_eq!(
            command_args(&cmd),
            vec![
                "-overwrite_original",
                "-n",
                "-XMP-GPano:ProjectionType=equirectangular",
                "-ImageDescription=360 degree panorama",
                "/out/a.jpg",
            ]
        );
    }
}
