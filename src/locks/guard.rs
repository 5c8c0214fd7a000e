//! Record mutex.
//!
//! Every mutation of a lock record (claim, join, leave, delete) happens while
//! holding `<record>.mutex`, a file created with exclusive-create semantics.
//! Creating it is the atomic step; the read-modify-write of the record that
//! follows cannot interleave with another mutator. The mutex lives for the
//! duration of one mutation and is removed right after.
//!
//! A mutex outlives its holder only if the process died mid-mutation. Such a
//! mutex is reclaimed once it is older than [`MUTEX_STALE_AFTER`] and its pid
//! is confirmed dead. Reclaimers take `<record>.mutex.reclaim` (also
//! exclusive-create) first, re-read the mutex under it and remove it only if
//! it is still the one they judged abandoned. A reclaim guard left by a dead
//! reclaimer ages out the same way.

use super::liveness::ProcessLivenessChecker;
use super::record::{is_older_than, modified_at};
use crate::error::{LockError, LockResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Age after which an abandoned mutex may be reclaimed.
pub const MUTEX_STALE_AFTER: Duration = Duration::from_secs(2);

const MUTEX_SUFFIX: &str = ".mutex";

const RECLAIM_SUFFIX: &str = ".reclaim";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MutexOwner {
    pid: u32,
    holder: String,
    created_at: DateTime<Utc>,
}

/// `<record>.mutex`
pub fn mutex_path(lock_path: &Path) -> PathBuf {
    with_suffix(lock_path, MUTEX_SUFFIX)
}

/// `<record>.mutex.reclaim`
fn reclaim_path(mutex: &Path) -> PathBuf {
    with_suffix(mutex, RECLAIM_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}

/// RAII guard for the record mutex.
///
/// When dropped, the mutex file is removed. If removal fails, a warning is
/// logged but no panic occurs.
#[derive(Debug)]
pub struct RecordMutex {
    path: PathBuf,
    released: bool,
}

impl RecordMutex {
    /// One attempt to take the mutex guarding `lock_path`.
    ///
    /// Returns `Ok(None)` when another live mutator holds it.
    pub fn try_lock(
        lock_path: &Path,
        holder_id: &str,
        liveness: &dyn ProcessLivenessChecker,
    ) -> LockResult<Option<Self>> {
        let path = mutex_path(lock_path);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
        }

        match create_mutex(&path, holder_id)? {
            true => Ok(Some(Self::new(path))),
            false => {
                if reclaim_abandoned(&path, holder_id, liveness)?
                    && create_mutex(&path, holder_id)?
                {
                    return Ok(Some(Self::new(path)));
                }
                Ok(None)
            }
        }
    }

    fn new(path: PathBuf) -> Self {
        Self {
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing removal errors.
    pub fn unlock(mut self) -> LockResult<()> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::io(&self.path, e)),
        }
    }
}

impl Drop for RecordMutex {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = fs::remove_file(&self.path)
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove record mutex");
        }
    }
}

/// Remove a mutex left behind by `holder_id` (crash between create and
/// remove inside this process). Returns whether one was removed.
pub fn remove_if_owned(lock_path: &Path, holder_id: &str) -> LockResult<bool> {
    let path = mutex_path(lock_path);
    let owned = fs::read_to_string(&path)
        .ok()
        .and_then(|c| serde_json::from_str::<MutexOwner>(&c).ok())
        .is_some_and(|o| o.holder == holder_id && o.pid == std::process::id());
    if !owned {
        return Ok(false);
    }
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(LockError::io(&path, e)),
    }
}

fn create_mutex(path: &Path, holder_id: &str) -> LockResult<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(LockError::io(path, e)),
    };

    let owner = MutexOwner {
        pid: std::process::id(),
        holder: holder_id.to_string(),
        created_at: Utc::now(),
    };
    // The mutex is held from this point; its content only helps reclaimers.
    let content = serde_json::to_string(&owner).unwrap_or_default();
    if let Err(e) = file.write_all(content.as_bytes()) {
        debug!(path = %path.display(), error = %e, "failed to write mutex owner");
    }
    Ok(true)
}

/// Whether `content` (read from `path`) belongs to a mutation that died:
/// older than [`MUTEX_STALE_AFTER`] and its pid is not running. An empty or
/// garbled file past the threshold has no pid to protect.
fn is_abandoned(path: &Path, content: &str, liveness: &dyn ProcessLivenessChecker) -> bool {
    let owner = serde_json::from_str::<MutexOwner>(content).ok();
    let created = owner
        .as_ref()
        .map(|o| o.created_at)
        .or_else(|| modified_at(path));
    let Some(created) = created else {
        return false;
    };
    if !is_older_than(created, MUTEX_STALE_AFTER) {
        return false;
    }
    owner.is_none_or(|o| !liveness.exists(o.pid))
}

/// Reclaim a mutex whose owner died mid-mutation. Returns `true` when the
/// path is free for a fresh `create_new`.
fn reclaim_abandoned(
    path: &Path,
    holder_id: &str,
    liveness: &dyn ProcessLivenessChecker,
) -> LockResult<bool> {
    let observed = match fs::read_to_string(path) {
        Ok(content) => content,
        // Released between our create attempt and now.
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(LockError::io(path, e)),
    };
    if !is_abandoned(path, &observed, liveness) {
        return Ok(false);
    }

    let guard_path = reclaim_path(path);
    if !create_mutex(&guard_path, holder_id)? {
        clear_abandoned_guard(&guard_path, liveness);
        return Ok(false);
    }
    let guard = RecordMutex::new(guard_path);

    let removed = remove_if_unchanged(path, &observed)?;
    if let Err(e) = guard.unlock() {
        warn!(path = %path.display(), error = %e, "failed to remove reclaim guard");
    }
    if removed {
        warn!(
            path = %path.display(),
            "reclaimed record mutex abandoned by a dead process"
        );
    }
    Ok(removed)
}

/// Remove the mutex at `path` if it still holds `observed`. Caller holds the
/// reclaim guard, so nobody else can replace the file meanwhile.
fn remove_if_unchanged(path: &Path, observed: &str) -> LockResult<bool> {
    match fs::read_to_string(path) {
        Ok(current) if current == observed => {}
        Ok(_) => {
            debug!(path = %path.display(), "record mutex changed hands; not reclaiming");
            return Ok(false);
        }
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(LockError::io(path, e)),
    }
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
        Err(e) => Err(LockError::io(path, e)),
    }
}

/// Drop a reclaim guard whose reclaimer died. The next attempt retries.
fn clear_abandoned_guard(guard_path: &Path, liveness: &dyn ProcessLivenessChecker) {
    let Ok(content) = fs::read_to_string(guard_path) else {
        return;
    };
    if !is_abandoned(guard_path, &content, liveness) {
        return;
    }
    match fs::remove_file(guard_path) {
        Ok(()) => warn!(path = %guard_path.display(), "removed reclaim guard abandoned by a dead process"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %guard_path.display(), error = %e, "failed to remove abandoned reclaim guard"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedLiveness;
    use tempfile::TempDir;

    fn write_owner_at(path: &Path, pid: u32, age: chrono::Duration) {
        let owner = MutexOwner {
            pid,
            holder: "someone".to_string(),
            created_at: Utc::now() - age,
        };
        fs::write(path, serde_json::to_string(&owner).unwrap()).unwrap();
    }

    fn write_owner(lock_path: &Path, pid: u32, age: chrono::Duration) {
        write_owner_at(&mutex_path(lock_path), pid, age);
    }

    fn leftovers(dir: &Path, suffix: &str) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(suffix))
            .count()
    }

    #[test]
    fn test_mutex_is_exclusive() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        let liveness = FixedLiveness::all_alive();

        let first = RecordMutex::try_lock(&lock_path, "h1", &liveness).unwrap();
        assert!(first.is_some());
        let second = RecordMutex::try_lock(&lock_path, "h2", &liveness).unwrap();
        assert!(second.is_none());

        first.unwrap().unlock().unwrap();
        assert!(!mutex_path(&lock_path).exists());
        assert!(RecordMutex::try_lock(&lock_path, "h2", &liveness).unwrap().is_some());
    }

    #[test]
    fn test_drop_removes_mutex() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");

        let guard = RecordMutex::try_lock(&lock_path, "h1", &FixedLiveness::all_alive())
            .unwrap()
            .unwrap();
        assert!(guard.path().exists());
        drop(guard);
        assert!(!mutex_path(&lock_path).exists());
    }

    #[test]
    fn test_old_mutex_of_dead_process_is_reclaimed() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));

        let liveness = FixedLiveness::dead(&[4242]);
        let guard = RecordMutex::try_lock(&lock_path, "h1", &liveness).unwrap();

        assert!(guard.is_some());
        assert_eq!(leftovers(temp_dir.path(), RECLAIM_SUFFIX), 0);
    }

    #[test]
    fn test_reclaim_in_progress_blocks_other_reclaimers() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));
        // A live reclaimer is mid-way through.
        write_owner_at(
            &reclaim_path(&mutex_path(&lock_path)),
            std::process::id(),
            chrono::Duration::zero(),
        );

        let guard = RecordMutex::try_lock(&lock_path, "h1", &FixedLiveness::dead(&[4242])).unwrap();

        assert!(guard.is_none());
        assert!(mutex_path(&lock_path).exists());
    }

    #[test]
    fn test_abandoned_reclaim_guard_ages_out() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        let guard_path = reclaim_path(&mutex_path(&lock_path));
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));
        write_owner_at(&guard_path, 4343, chrono::Duration::seconds(30));
        let liveness = FixedLiveness::dead(&[4242, 4343]);

        assert!(RecordMutex::try_lock(&lock_path, "h1", &liveness).unwrap().is_none());
        assert!(!guard_path.exists());

        let guard = RecordMutex::try_lock(&lock_path, "h1", &liveness).unwrap();
        assert!(guard.is_some());
        assert_eq!(leftovers(temp_dir.path(), RECLAIM_SUFFIX), 0);
    }

    #[test]
    fn test_mutex_replaced_since_observed_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));
        let observed = fs::read_to_string(mutex_path(&lock_path)).unwrap();

        // Another reclaimer won and a live mutator now holds a fresh mutex.
        fs::remove_file(mutex_path(&lock_path)).unwrap();
        let live = RecordMutex::try_lock(&lock_path, "h2", &FixedLiveness::all_alive())
            .unwrap()
            .unwrap();

        assert!(!remove_if_unchanged(live.path(), &observed).unwrap());
        assert!(live.path().exists());
        live.unlock().unwrap();
    }

    #[test]
    fn test_unchanged_abandoned_mutex_is_removed() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));
        let path = mutex_path(&lock_path);
        let observed = fs::read_to_string(&path).unwrap();

        assert!(remove_if_unchanged(&path, &observed).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_old_mutex_of_live_process_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::seconds(30));

        let guard = RecordMutex::try_lock(&lock_path, "h1", &FixedLiveness::all_alive()).unwrap();
        assert!(guard.is_none());
        assert!(mutex_path(&lock_path).exists());
    }

    #[test]
    fn test_fresh_mutex_of_dead_process_is_kept() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        write_owner(&lock_path, 4242, chrono::Duration::zero());

        let guard = RecordMutex::try_lock(&lock_path, "h1", &FixedLiveness::dead(&[4242])).unwrap();
        assert!(guard.is_none());
    }

    #[test]
    fn test_remove_if_owned() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("a.json.lock");
        let guard = RecordMutex::try_lock(&lock_path, "h1", &FixedLiveness::all_alive())
            .unwrap()
            .unwrap();
        std::mem::forget(guard);

        assert!(!remove_if_owned(&lock_path, "h2").unwrap());
        assert!(remove_if_owned(&lock_path, "h1").unwrap());
        assert!(!mutex_path(&lock_path).exists());
    }
}
