//! Configuration module for stitchd
//!
//! Handles loading the persisted TOML configuration, bootstrapping a default
//! document when none exists, and environment variable overrides.

pub mod config;
pub mod store;

pub use config::*;
pub use store::ConfigStore;
