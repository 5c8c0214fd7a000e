//! Monitor options, events and statistics.

use crate::locks::DEFAULT_STALE_TIMEOUT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pause between periodic scans.
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default number of events kept in memory.
pub const DEFAULT_MAX_HISTORY: usize = 100;

/// Configuration for a [`LockMonitor`](super::LockMonitor).
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOptions {
    pub scan_interval: Duration,
    /// Records whose `updated_at` is older than this are reported as stale.
    pub stale_timeout: Duration,
    /// Reclaim orphaned records during scans.
    pub auto_cleanup: bool,
    /// Capacity of the in-memory event history (at least 1).
    pub max_history_records: usize,
    /// Also append every event to this NDJSON file.
    pub audit_log_path: Option<PathBuf>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            scan_interval: DEFAULT_SCAN_INTERVAL,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            auto_cleanup: true,
            max_history_records: DEFAULT_MAX_HISTORY,
            audit_log_path: None,
        }
    }
}

impl MonitorOptions {
    pub fn with_scan_interval(mut self, scan_interval: Duration) -> Self {
        self.scan_interval = scan_interval;
        self
    }

    pub fn with_stale_timeout(mut self, stale_timeout: Duration) -> Self {
        self.stale_timeout = stale_timeout;
        self
    }

    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    pub fn with_max_history_records(mut self, max_history_records: usize) -> Self {
        self.max_history_records = max_history_records;
        self
    }

    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log_path = Some(path.into());
        self
    }
}

/// Kinds of events a monitor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEventType {
    /// A record older than the stale threshold was found.
    StaleDetected,
    /// A stale record whose holders are all dead was found.
    OrphanDetected,
    /// An orphaned record was reclaimed.
    Cleaned,
    /// Reclaiming an orphaned record failed.
    CleanupFailed,
    /// A scan pass finished.
    ScanCompleted,
}

impl LockEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockEventType::StaleDetected => "stale_detected",
            LockEventType::OrphanDetected => "orphan_detected",
            LockEventType::Cleaned => "cleaned",
            LockEventType::CleanupFailed => "cleanup_failed",
            LockEventType::ScanCompleted => "scan_completed",
        }
    }
}

impl fmt::Display for LockEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the monitor's event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: LockEventType,
    /// Lock record path; empty for `scan_completed`.
    #[serde(default)]
    pub lock_path: PathBuf,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl LockEvent {
    pub fn new(event_type: LockEventType, lock_path: &Path) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            lock_path: lock_path.to_path_buf(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Running counters of a monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Set by `start()`, kept across `reset_stats()` while running.
    pub started_at: Option<DateTime<Utc>>,
    pub scan_count: u64,
    pub stale_locks_found: u64,
    pub locks_cleaned: u64,
    pub last_scan_time: Option<DateTime<Utc>>,
    /// Watched paths holding a record during the last scan.
    pub last_scan_lock_count: usize,
}
