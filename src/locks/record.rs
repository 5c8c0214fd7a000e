//! On-disk lock record.
//!
//! A record is a small pretty-printed JSON document at the lock path:
//!
//! ```json
//! {
//!   "pid": 4242,
//!   "mode": "shared",
//!   "owner": "ops@db-01",
//!   "holders": [
//!     { "id": "2b0f…", "pid": 4242, "joined_at": "2026-10-15T09:12:03Z" },
//!     { "id": "9c1e…", "pid": 4310, "joined_at": "2026-10-15T09:12:04Z" }
//!   ],
//!   "created_at": "2026-10-15T09:12:03Z",
//!   "updated_at": "2026-10-15T09:12:04Z"
//! }
//! ```
//!
//! An exclusive record carries exactly one holder. A shared record carries
//! one entry per joined reader; the record is deleted when the last one
//! leaves. Records are only mutated while the record mutex is held (see
//! [`super::guard`]) and are always replaced atomically.

use super::types::LockMode;
use crate::error::{LockError, LockResult};
use crate::fs::atomic_write_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

/// One holder of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderEntry {
    /// Unique per `FileLock` handle.
    pub id: String,
    pub pid: u32,
    pub joined_at: DateTime<Utc>,
}

/// Lock record stored in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// A current holder's process: the claimer until it leaves, then the
    /// earliest remaining holder.
    pub pid: u32,
    pub mode: LockMode,
    /// `user@host` of the claimer, for operators.
    pub owner: String,
    #[serde(default)]
    pub holders: Vec<HolderEntry>,
    pub created_at: DateTime<Utc>,
    /// Refreshed by every claim and join.
    pub updated_at: DateTime<Utc>,
}

impl LockRecord {
    /// Fresh record for a first claim by `holder_id` in this process.
    pub fn claim(mode: LockMode, holder_id: &str) -> Self {
        let now = Utc::now();
        let pid = std::process::id();
        Self {
            pid,
            mode,
            owner: owner_string(),
            holders: vec![HolderEntry {
                id: holder_id.to_string(),
                pid,
                joined_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a shared holder and refresh `updated_at`.
    pub fn join(&mut self, holder_id: &str) {
        let now = Utc::now();
        if !self.holds(holder_id) {
            self.holders.push(HolderEntry {
                id: holder_id.to_string(),
                pid: std::process::id(),
                joined_at: now,
            });
        }
        self.updated_at = now;
    }

    /// Remove a holder. Returns whether it was present.
    pub fn remove_holder(&mut self, holder_id: &str) -> bool {
        let before = self.holders.len();
        self.holders.retain(|h| h.id != holder_id);
        self.repoint_pid();
        self.holders.len() != before
    }

    /// Drop every holder whose pid is in `dead`.
    pub fn prune_pids(&mut self, dead: &[u32]) {
        self.holders.retain(|h| !dead.contains(&h.pid));
        self.repoint_pid();
    }

    /// `pid` if it still belongs to a holder, otherwise the earliest
    /// remaining holder's pid.
    pub fn current_pid(&self) -> u32 {
        match self.holders.first() {
            Some(first) if !self.holders.iter().any(|h| h.pid == self.pid) => first.pid,
            _ => self.pid,
        }
    }

    fn repoint_pid(&mut self) {
        self.pid = self.current_pid();
    }

    pub fn holds(&self, holder_id: &str) -> bool {
        self.holders.iter().any(|h| h.id == holder_id)
    }

    /// Distinct pids of all holders, falling back to the claimer's pid for
    /// records written without a holder list.
    pub fn holder_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.holders.iter().map(|h| h.pid).collect();
        if pids.is_empty() {
            pids.push(self.pid);
        }
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    /// Time since the last claim or join.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.updated_at)
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        is_older_than(self.updated_at, threshold)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        format_age(self.age())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// What currently sits at a lock path.
#[derive(Debug, Clone)]
pub enum RecordState {
    Absent,
    Present(LockRecord),
    /// Exists but does not parse. Never reclaimed automatically.
    Unreadable {
        modified: Option<DateTime<Utc>>,
        reason: String,
    },
}

/// Read the record at `path`.
pub fn read_record(path: &Path) -> LockResult<RecordState> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RecordState::Absent),
        Err(e) => return Err(LockError::io(path, e)),
    };

    match serde_json::from_str::<LockRecord>(&content) {
        Ok(record) => Ok(RecordState::Present(record)),
        Err(e) => Ok(RecordState::Unreadable {
            modified: modified_at(path),
            reason: e.to_string(),
        }),
    }
}

/// Atomically replace the record at `path`.
pub fn write_record(path: &Path, record: &LockRecord) -> LockResult<()> {
    let json = record.to_json().map_err(|e| LockError::Record {
        path: path.to_path_buf(),
        message: format!("failed to serialize lock record: {}", e),
    })?;
    atomic_write_file(path, &json)
}

/// Delete the record at `path`. Returns whether one existed.
pub fn remove_record(path: &Path) -> LockResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LockError::io(path, e)),
    }
}

pub(crate) fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

pub(crate) fn is_older_than(at: DateTime<Utc>, threshold: Duration) -> bool {
    let age = Utc::now().signed_duration_since(at);
    match chrono::Duration::from_std(threshold) {
        Ok(threshold) => age > threshold,
        Err(_) => false,
    }
}

pub(crate) fn format_age(age: chrono::Duration) -> String {
    let seconds = age.num_seconds().max(0);
    let minutes = age.num_minutes();
    let hours = age.num_hours();
    let days = age.num_days();

    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

/// `user@host` of the current process.
pub(crate) fn owner_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}
