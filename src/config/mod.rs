//! Configuration model for prism-gateway.
//!
//! This module defines the Config struct that represents `prism-gateway.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! defaults for every field, and validation of config values.

mod model;
mod operations;
pub mod types;


// Re-export public API
pub use model::Config;
pub use types::{DEFAULT_CONFIG_FILE, LockSection, LogLevel, LoggingSection, MonitorSection};
