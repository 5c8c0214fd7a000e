//! Configuration sections and defaults.

use crate::locks::{DEFAULT_RETRY_INTERVAL, DEFAULT_STALE_TIMEOUT, DEFAULT_TIMEOUT};
use crate::monitor::{DEFAULT_MAX_HISTORY, DEFAULT_SCAN_INTERVAL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "prism-gateway.yaml";

/// Defaults for every `FileLock` the binary creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSection {
    /// Maximum wait in `acquire`, in milliseconds.
    pub timeout_ms: u64,
    /// Pause between acquire attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Age after which a record counts as stale, in milliseconds.
    pub stale_timeout_ms: u64,
    /// Reclaim orphaned records while acquiring.
    pub auto_cleanup: bool,
}

impl Default for LockSection {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT.as_millis() as u64,
            auto_cleanup: true,
        }
    }
}

/// Settings for `monitor run` and `monitor scan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub scan_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub auto_cleanup: bool,
    pub max_history_records: usize,
    /// NDJSON audit log of monitor events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
    /// Lock record paths watched in addition to those given on the command line.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<PathBuf>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            scan_interval_ms: DEFAULT_SCAN_INTERVAL.as_millis() as u64,
            stale_timeout_ms: DEFAULT_STALE_TIMEOUT.as_millis() as u64,
            auto_cleanup: true,
            max_history_records: DEFAULT_MAX_HISTORY,
            audit_log: None,
            watch: Vec::new(),
        }
    }
}

/// Log verbosity used when `RUST_LOG` is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
