//! Lock modes, options, and inspection results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default time `acquire` waits before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause between acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default age after which a record is considered stale.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Suffix appended to a resource path to form its lock record path.
pub const LOCK_FILE_SUFFIX: &str = ".lock";

/// Reader/writer lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Readers: any number of shared holders may coexist.
    Shared,
    /// Writer: excludes every other holder.
    #[default]
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }

    /// Whether a holder in `self` mode may coexist with one in `other` mode.
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock state as seen from one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// No record exists.
    Unlocked,
    /// A record exists and the inspecting handle is one of its holders.
    Locked,
    /// A record exists and belongs to someone else.
    LockedByOther,
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockStatus::Unlocked => "unlocked",
            LockStatus::Locked => "locked",
            LockStatus::LockedByOther => "locked by other",
        };
        f.write_str(s)
    }
}

/// Tuning for a [`FileLock`](super::FileLock).
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Overall deadline for `acquire`. Zero means a single attempt.
    pub timeout: Duration,
    /// Pause between attempts while the lock is busy.
    pub retry_interval: Duration,
    /// Explicit record path; defaults to `<resource>.lock`.
    pub lock_file_path: Option<PathBuf>,
    /// Age of `updated_at` beyond which a record is stale.
    pub stale_timeout: Duration,
    /// Reclaim stale records whose holders are confirmed dead while acquiring.
    pub auto_cleanup: bool,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            lock_file_path: None,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            auto_cleanup: true,
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    pub fn with_lock_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_file_path = Some(path.into());
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

    /// Resolve the record path for `resource`.
    pub fn lock_path_for(&self, resource: &Path) -> PathBuf {
        match &self.lock_file_path {
            Some(path) => path.clone(),
            None => default_lock_path(resource),
        }
    }
}

/// `<resource>.lock`
pub fn default_lock_path(resource: &Path) -> PathBuf {
    let mut os = resource.as_os_str().to_os_string();
    os.push(LOCK_FILE_SUFFIX);
    PathBuf::from(os)
}

/// Read-only snapshot of a lock record, as returned by `get_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockInfo {
    pub status: LockStatus,
    pub lock_file_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<LockMode>,
    /// Number of shared holders; only set for shared records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_count: Option<usize>,
    /// Distinct pids of every recorded holder.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub holder_pids: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Time-based only; says nothing about whether the holder is alive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_stale: Option<bool>,
}

impl LockInfo {
    pub(crate) fn unlocked(lock_file_path: PathBuf) -> Self {
        Self {
            status: LockStatus::Unlocked,
            lock_file_path,
            pid: None,
            mode: None,
            shared_count: None,
            holder_pids: Vec::new(),
            created_at: None,
            updated_at: None,
            is_stale: None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.status != LockStatus::Unlocked
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale.unwrap_or(false)
    }
}

impl fmt::Display for LockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}", self.lock_file_path.display(), self.status)?;
        if let Some(mode) = self.mode {
            write!(f, ", {}", mode)?;
        }
        if let Some(pid) = self.pid {
            write!(f, ", pid {}", pid)?;
        }
        if let Some(count) = self.shared_count {
            write!(f, ", {} holder(s)", count)?;
        }
        if self.is_stale() {
            write!(f, ", STALE")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lock_path_appends_suffix() {
        let path = default_lock_path(Path::new("/data/records.json"));
        assert_eq!(path, PathBuf::from("/data/records.json.lock"));
    }

    #[test]
    fn lock_file_path_override_wins() {
        let opts = LockOptions::default().with_lock_file_path("/locks/custom.lock");
        assert_eq!(
            opts.lock_path_for(Path::new("/data/records.json")),
            PathBuf::from("/locks/custom.lock")
        );
    }

    #[test]
    fn only_shared_pairs_are_compatible() {
        assert!(LockMode::Shared.is_compatible_with(LockMode::Shared));
        assert!(!LockMode::Shared.is_compatible_with(LockMode::Exclusive));
        assert!(!LockMode::Exclusive.is_compatible_with(LockMode::Shared));
        assert!(!LockMode::Exclusive.is_compatible_with(LockMode::Exclusive));
    }

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&LockMode::Exclusive).unwrap(),
            "\"exclusive\""
        );
        assert_eq!(
            serde_json::from_str::<LockMode>("\"shared\"").unwrap(),
            LockMode::Shared
        );
    }

    #[test]
    fn lock_info_display_marks_stale() {
        let mut info = LockInfo::unlocked(PathBuf::from("/data/a.lock"));
        info.status = LockStatus::LockedByOther;
        info.mode = Some(LockMode::Exclusive);
        info.pid = Some(7);
        info.is_stale = Some(true);

        let display = info.to_string();
        assert!(display.contains("locked by other"));
        assert!(display.contains("pid 7"));
        assert!(display.contains("STALE"));
    }
}
