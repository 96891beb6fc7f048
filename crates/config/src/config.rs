//! Core configuration structures and parsing logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Human-readable note written as the `comment` key of a freshly created
/// configuration document.
pub const DEFAULT_COMMENT: &str = "stitchd batch converter configuration";

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing the config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// TOML rendering error
    Render(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to access config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Render(e) => write!(f, "Failed to render config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::Render(e)
    }
}

fn default_output_width() -> u32 {
    5760
}

fn default_output_height() -> u32 {
    2880
}

fn default_bitrate() -> u64 {
    50_000_000
}

fn default_max_concurrent_jobs() -> u32 {
    1
}

fn default_watch_interval_seconds() -> u64 {
    30
}

/// Process-wide configuration, loaded once at startup.
///
/// Keys are persisted in camelCase. Any key missing from an existing document
/// takes its default value; unknown keys (such as `comment`) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Use hardware acceleration if available
    #[serde(default)]
    pub enable_acceleration: bool,
    /// Target raster width for video output, in pixels
    #[serde(default = "default_output_width")]
    pub output_width: u32,
    /// Target raster height for video output, in pixels
    #[serde(default = "default_output_height")]
    pub output_height: u32,
    /// Encoded video bitrate, bits/sec
    #[serde(default = "default_bitrate")]
    pub bitrate: u64,
    /// Upper bound on the worker pool size (0 is treated as 1)
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// Poll period between scans in watch mode
    #[serde(default = "default_watch_interval_seconds")]
    pub watch_interval_seconds: u64,
    /// Continuous watch mode instead of a single pass
    #[serde(default)]
    pub watch_mode_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_acceleration: false,
            output_width: default_output_width(),
            output_height: default_output_height(),
            bitrate: default_bitrate(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            watch_interval_seconds: default_watch_interval_seconds(),
            watch_mode_enabled: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Strict variant: IO and parse failures are returned to the caller.
    /// See [`crate::ConfigStore::load`] for the fail-soft startup path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Render this configuration as a documented TOML document.
    ///
    /// The document carries a `comment` key ahead of the recognized keys.
    pub fn to_document(&self) -> Result<String, ConfigError> {
        let body = toml::to_string(self)?;
        let comment = toml::Value::String(DEFAULT_COMMENT.to_string());
        Ok(format!("comment = {}\n{}", comment, body))
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - STITCHD_ENABLE_ACCELERATION -> enableAcceleration
    /// - STITCHD_OUTPUT_WIDTH -> outputWidth
    /// - STITCHD_OUTPUT_HEIGHT -> outputHeight
    /// - STITCHD_BITRATE -> bitrate
    /// - STITCHD_MAX_CONCURRENT_JOBS -> maxConcurrentJobs
    /// - STITCHD_WATCH_INTERVAL_SECONDS -> watchIntervalSeconds
    /// - STITCHD_WATCH_MODE -> watchModeEnabled
    pub fn apply_env_overrides(&mut self) {
        if let Some(flag) = env_flag("STITCHD_ENABLE_ACCELERATION") {
            self.enable_acceleration = flag;
        }

        if let Some(width) = env_number("STITCHD_OUTPUT_WIDTH") {
            self.output_width = width;
        }

        if let Some(height) = env_number("STITCHD_OUTPUT_HEIGHT") {
            self.output_height = height;
        }

        if let Some(bitrate) = env_number("STITCHD_BITRATE") {
            self.bitrate = bitrate;
        }

        if let Some(jobs) = env_number("STITCHD_MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = jobs;
        }

        if let Some(secs) = env_number("STITCHD_WATCH_INTERVAL_SECONDS") {
            self.watch_interval_seconds = secs;
        }

        if let Some(flag) = env_flag("STITCHD_WATCH_MODE") {
            self.watch_mode_enabled = flag;
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn env_flag(key: &str) -> Option<bool> {
    let val = env::var(key).ok()?;
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
