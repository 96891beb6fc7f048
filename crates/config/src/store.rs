//! Fail-soft configuration store
//!
//! Startup never fails because of configuration: an absent document is
//! bootstrapped with defaults, a malformed one is reported and replaced by
//! defaults in memory (the file on disk is left alone).

use crate::config::{Config, ConfigError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Persisted configuration record at a fixed path.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, never raising to the caller.
    ///
    /// - missing file: write the default document, return defaults
    /// - unreadable or malformed file: log, return defaults
    pub fn load(&self) -> Config {
        match Config::load_from_file(&self.path) {
            Ok(config) => {
                info!(path = %self.path.display(), "configuration loaded");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                match Self::create_default(&self.path) {
                    Ok(config) => {
                        info!(path = %self.path.display(), "default configuration created");
                        config
                    }
                    Err(e) => {
                        warn!(
                            path = %self.path.display(),
                            error = %e,
                            "could not persist default configuration, using defaults"
                        );
                        Config::default()
                    }
                }
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "invalid configuration, using defaults"
                );
                Config::default()
            }
        }
    }

    /// Write the canonical default document to `path` and return it.
    ///
    /// Only called once absence has been confirmed. Missing parent
    /// directories are created.
    pub fn create_default(path: &Path) -> Result<Config, ConfigError> {
        let config = Config::default();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, config.to_document()?)?;
        Ok(config)
    }
}
