//! Camera model detection and output resolution lookup.
//!
//! The model is read from capture tags, falling back to the embedded pixel
//! dimensions. Unknown models resolve to the highest-resolution profile:
//! an oversized panorama is preferred to an undersized one.

use crate::metadata::{tags, MetadataService, TagMap};
use std::path::Path;
use tracing::{info, warn};

/// Model name returned when nothing in the tags identifies the camera.
pub const UNKNOWN_MODEL: &str = "Unknown";

/// Output raster for a camera model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionProfile {
    pub width: u32,
    pub height: u32,
    pub model_name: &'static str,
}

impl ResolutionProfile {
    pub const fn new(width: u32, height: u32, model_name: &'static str) -> Self {
        Self {
            width,
            height,
            model_name,
        }
    }

    pub fn megapixels(&self) -> f64 {
        (self.width as f64 * self.height as f64) / 1_000_000.0
    }
}

const X4: ResolutionProfile = ResolutionProfile::new(11904, 5952, "Insta360 X4");
const X3: ResolutionProfile = ResolutionProfile::new(11520, 5760, "Insta360 X3");
const ONE_X2: ResolutionProfile = ResolutionProfile::new(11520, 5760, "Insta360 ONE X2");
const ONE_X: ResolutionProfile = ResolutionProfile::new(11520, 5760, "Insta360 ONE X");
const ONE_RS: ResolutionProfile = ResolutionProfile::new(12000, 6000, "Insta360 ONE RS");
const ONE_R: ResolutionProfile = ResolutionProfile::new(10560, 5280, "Insta360 ONE R");
const ONE: ResolutionProfile = ResolutionProfile::new(7680, 3840, "Insta360 ONE");

/// Returned for models not in the table.
pub const DEFAULT_PROFILE: ResolutionProfile =
    ResolutionProfile::new(11904, 5952, "Unknown Model (X4 Default)");

/// Model name (and short aliases) to profile.
///
/// Fuzzy matching walks this slice in order, so longer, more specific names
/// come before the names they contain.
pub const MODEL_TABLE: &[(&str, ResolutionProfile)] = &[
    ("Insta360 ONE X2", ONE_X2),
    ("Insta360 ONE RS", ONE_RS),
    ("Insta360 ONE X", ONE_X),
    ("Insta360 ONE R", ONE_R),
    ("Insta360 X4", X4),
    ("Insta360 X3", X3),
    ("Insta360 ONE", ONE),
    ("ONE X2", ONE_X2),
    ("ONE RS", ONE_RS),
    ("ONE X", ONE_X),
    ("ONE R", ONE_R),
    ("X4", X4),
    ("X3", X3),
    ("X2", ONE_X2),
    ("ONE", ONE),
];

/// Tags inspected for a model name, in priority order.
pub const MODEL_TAGS: &[&str] = &[
    tags::MODEL,
    tags::MAKE,
    tags::OWNER_NAME,
    tags::INTEROP_INDEX,
];

/// Keyword rules over a lower-cased tag value. Checked in order: a name
/// containing "one x2" must hit the X2 rule before the "one x" rule. The
/// plain ONE is matched separately, as a whole word only.
const KEYWORD_RULES: &[(&[&str], &str)] = &[
    (&["x4"], "Insta360 X4"),
    (&["x3"], "Insta360 X3"),
    (&["x2"], "Insta360 ONE X2"),
    (&["one x"], "Insta360 ONE X"),
    (&["one rs", "oners"], "Insta360 ONE RS"),
    (&["one r"], "Insta360 ONE R"),
];

/// Minimum (width, height) per sensor generation, widest first.
const PIXEL_WIDTH_RULES: &[(u32, u32, &str)] = &[
    (12000, 6000, "Insta360 ONE RS"),
    (11900, 0, "Insta360 X4"),
    (11500, 0, "Insta360 X3"),
    (10500, 0, "Insta360 ONE R"),
    (7680, 0, "Insta360 ONE"),
];

fn model_from_value(value: &str) -> Option<String> {
    let lower = value.to_lowercase();
    for (needles, model) in KEYWORD_RULES {
        if needles.iter().any(|needle| lower.contains(needle)) {
            return Some((*model).to_string());
        }
    }
    if lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == "one")
    {
        return Some(ONE.model_name.to_string());
    }
    if lower.contains("insta360") {
        return Some(value.trim().to_string());
    }
    None
}

fn tag_number(tags: &TagMap, key: &str) -> Option<u32> {
    let raw = tags.get(key)?.trim();
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v as u32))
}

fn model_from_dimensions(tags: &TagMap) -> Option<String> {
    let width = tag_number(tags, tags::PIXEL_WIDTH)?;
    let height = tag_number(tags, tags::PIXEL_HEIGHT)?;
    PIXEL_WIDTH_RULES
        .iter()
        .find(|(min_w, min_h, _)| width >= *min_w && height >= *min_h)
        .map(|(_, _, model)| (*model).to_string())
}

/// Identify the camera model from a tag map.
///
/// Returns [`UNKNOWN_MODEL`] when neither the model tags nor the pixel
/// dimensions identify the camera.
pub fn model_from_tags(tags: &TagMap) -> String {
    MODEL_TAGS
        .iter()
        .filter_map(|key| tags.get(*key))
        .find_map(|value| model_from_value(value))
        .or_else(|| model_from_dimensions(tags))
        .unwrap_or_else(|| UNKNOWN_MODEL.to_string())
}

/// Read the tags of `path` and identify the camera model.
///
/// Unreadable metadata yields [`UNKNOWN_MODEL`].
pub fn extract_model(metadata: &dyn MetadataService, path: &Path) -> String {
    match metadata.read_tags(path) {
        Ok(tags) => model_from_tags(&tags),
        Err(e) => {
            warn!(
                path = %path.display(),
                stage = "resolve",
                error = %e,
                "cannot read capture metadata"
            );
            UNKNOWN_MODEL.to_string()
        }
    }
}

/// Look up the output profile for a model name.
///
/// Exact match first, then case-insensitive containment in either direction,
/// then [`DEFAULT_PROFILE`].
pub fn resolve(model_name: &str) -> ResolutionProfile {
    if let Some((_, profile)) = MODEL_TABLE.iter().find(|(key, _)| *key == model_name) {
        return *profile;
    }

    let query = model_name.trim().to_lowercase();
    if !query.is_empty() && query != UNKNOWN_MODEL.to_lowercase() {
        let fuzzy = MODEL_TABLE.iter().find(|(key, _)| {
            let key = key.to_lowercase();
            query.contains(&key) || key.contains(&query)
        });
        if let Some((_, profile)) = fuzzy {
            return *profile;
        }
    }

    warn!(
        model = model_name,
        default = DEFAULT_PROFILE.model_name,
        "unknown camera model, using highest resolution"
    );
    DEFAULT_PROFILE
}

/// Detect the model of `path` and resolve its output profile.
pub fn detect(metadata: &dyn MetadataService, path: &Path) -> ResolutionProfile {
    let model = extract_model(metadata, path);
    let profile = resolve(&model);
    info!(
        path = %path.display(),
        stage = "resolve",
        model = profile.model_name,
        width = profile.width,
        height = profile.height,
        megapixels = %format!("{:.1}", profile.megapixels()),
        "resolved output resolution"
    );
    profile
}
