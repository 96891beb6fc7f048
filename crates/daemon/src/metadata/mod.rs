//! Metadata collaborator: reads capture tags and stamps panorama tags on output.

pub mod exiftool;

pub use exiftool::ExifTool;

use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Tag key to printable value, keyed by the tool's tag names.
pub type TagMap = BTreeMap<String, String>;

/// Tag names read from capture files.
pub mod tags {
    pub const MAKE: &str = "Make";
    pub const MODEL: &str = "Model";
    pub const OWNER_NAME: &str = "OwnerName";
    pub const INTEROP_INDEX: &str = "InteropIndex";
    pub const PIXEL_WIDTH: &str = "ExifImageWidth";
    pub const PIXEL_HEIGHT: &str = "ExifImageHeight";
    pub const SOFTWARE: &str = "Software";
}

/// Camera/capture tags copied from the source capture onto the stitched image.
pub const COPIED_TAGS: &[&str] = &[
    tags::MAKE,
    tags::MODEL,
    "ModifyDate",
    tags::SOFTWARE,
    "DateTimeOriginal",
    "CreateDate",
    "ExposureTime",
    "FNumber",
    "ISO",
    "WhiteBalance",
    "Flash",
    "ExposureProgram",
    "MeteringMode",
    "FocalLength",
    "GPSVersionID",
    "GPSLatitude",
    "GPSLatitudeRef",
    "GPSLongitude",
    "GPSLongitudeRef",
    "GPSAltitude",
    "GPSAltitudeRef",
];

/// Vendor written when neither the output nor the source carries a make.
pub const DEFAULT_MAKE: &str = "Insta360";

/// Always written over whatever software tag was present.
pub const SOFTWARE_NAME: &str = "stitchd";

/// Stitching engine credited in the GPano namespace.
pub const STITCHING_SOFTWARE: &str = "Insta360 SDK";

/// Error type for metadata operations.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata tool exited unsuccessfully.
    #[error("metadata tool failed: {0}")]
    ToolFailed(String),

    /// The tool's output could not be parsed.
    #[error("failed to parse metadata output: {0}")]
    Parse(String),

    /// IO error talking to the tool.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One tag write, `key` in the tool's write syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagAssignment {
    pub key: String,
    pub value: String,
}

impl TagAssignment {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Narrow surface of the metadata library the core relies on.
pub trait MetadataService: Send + Sync {
    /// Read all tags of `path`.
    fn read_tags(&self, path: &Path) -> Result<TagMap, MetadataError>;

    /// Write `assignments` into `path` in place.
    fn apply_tags(&self, path: &Path, assignments: &[TagAssignment]) -> Result<(), MetadataError>;

    /// Copy capture tags from `source` and mark `output` as an
    /// equirectangular panorama of `width` x `height`.
    ///
    /// An unreadable source only loses the copied tags; the panorama tags are
    /// still written.
    fn write_panorama_tags(
        &self,
        output: &Path,
        source: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), MetadataError> {
        let source_tags = self.read_tags(source).unwrap_or_else(|e| {
            warn!(
                path = %source.display(),
                stage = "metadata",
                error = %e,
                "cannot read source tags, proceeding without them"
            );
            TagMap::new()
        });
        let existing = self.read_tags(output)?;
        let plan = panorama_tag_plan(&source_tags, &existing, width, height);
        self.apply_tags(output, &plan)
    }
}

/// Ordered set of writes where a later `set` of the same key replaces the value.
#[derive(Debug, Default)]
struct Plan(Vec<TagAssignment>);

impl Plan {
    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|a| a.key == key) {
            Some(existing) => existing.value = value,
            None => self.0.push(TagAssignment::new(key, value)),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|a| a.key == key)
    }
}

/// Build the tag writes for a stitched panorama.
///
/// - allow-listed capture tags are copied from `source`
/// - GPano projection and pixel-size tags are set from `width`/`height`
/// - the make is only filled in when neither `existing` nor `source` has one
/// - the software tag is always overwritten
pub fn panorama_tag_plan(
    source: &TagMap,
    existing: &TagMap,
    width: u32,
    height: u32,
) -> Vec<TagAssignment> {
    let mut plan = Plan::default();

    for key in COPIED_TAGS {
        if let Some(value) = source.get(*key) {
            plan.set(key, value.clone());
        }
    }

    let width = width.to_string();
    let height = height.to_string();
    plan.set("XMP-GPano:ProjectionType", "equirectangular");
    plan.set("XMP-GPano:UsePanoramaViewer", "True");
    plan.set("XMP-GPano:StitchingSoftware", STITCHING_SOFTWARE);
    plan.set("XMP-GPano:FullPanoWidthPixels", width.as_str());
    plan.set("XMP-GPano:FullPanoHeightPixels", height.as_str());
    plan.set("XMP-GPano:CroppedAreaImageWidthPixels", width.as_str());
    plan.set("XMP-GPano:CroppedAreaImageHeightPixels", height.as_str());
    plan.set("XMP-GPano:CroppedAreaLeftPixels", "0");
    plan.set("XMP-GPano:CroppedAreaTopPixels", "0");

    plan.set("Orientation", "1");
    // 4 = "Other" scene type, the closest EXIF has to panorama
    plan.set("SceneCaptureType", "4");
    plan.set("ImageDescription", "360 degree panorama");
    plan.set("WhiteBalance", "0");

    if !existing.contains_key(tags::MAKE) && !plan.contains(tags::MAKE) {
        plan.set(tags::MAKE, DEFAULT_MAKE);
    }
    plan.set(tags::SOFTWARE, SOFTWARE_NAME);

    plan.0
}
