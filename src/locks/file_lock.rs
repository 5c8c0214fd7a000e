//! `FileLock`: reader/writer lock over a lock record file.
//!
//! Each handle is one holder. Acquisition is a cooperative polling loop: a
//! failed attempt sleeps `retry_interval` on the tokio timer and tries again
//! until the deadline. There is no wake-up on release and no fairness between
//! waiters, so a busy path can starve an exclusive waiter; hand-off latency is
//! bounded by the retry interval.
//!
//! `is_locked()` is this handle's belief. If another actor force-releases the
//! record, the handle keeps believing it holds the lock until it next talks to
//! the record (release or cleanup), which then reports `NotHeld`.

use super::guard::{self, RecordMutex};
use super::liveness::{OsLivenessChecker, ProcessLivenessChecker};
use super::record::{self, LockRecord, RecordState, read_record, remove_record, write_record};
use super::types::{LOCK_FILE_SUFFIX, LockInfo, LockMode, LockOptions, LockStatus};
use crate::error::{HolderState, LockError, LockResult};
use crate::fs::remove_own_temp_files;
use parking_lot::Mutex;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Minimum budget for taking the record mutex, even for zero-timeout attempts.
/// Mutex holders keep it for one record rewrite only.
const MUTEX_MIN_WAIT: Duration = Duration::from_millis(50);

/// Pause between record mutex attempts.
const MUTEX_SPIN: Duration = Duration::from_millis(2);

/// Budget for taking the record mutex on release and cleanup.
const RELEASE_MUTEX_WAIT: Duration = Duration::from_secs(5);

/// Budget for taking the record mutex on force release before going ahead
/// without it.
const FORCE_MUTEX_WAIT: Duration = Duration::from_secs(1);

enum Attempt {
    Acquired,
    Busy(HolderState),
}

/// Handle on one lock record path.
///
/// Dropping a handle that still holds its lock releases it synchronously:
/// the record mutex is polled with `std::thread::sleep` for at most 50ms,
/// which blocks the current thread (usually a tokio worker) for that long.
/// Call [`FileLock::release`] before dropping to stay off that path.
pub struct FileLock {
    resource_path: PathBuf,
    lock_path: PathBuf,
    options: LockOptions,
    holder_id: String,
    held: Mutex<Option<LockMode>>,
    liveness: Arc<dyn ProcessLivenessChecker>,
}

impl std::fmt::Debug for FileLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLock")
            .field("lock_path", &self.lock_path)
            .field("holder_id", &self.holder_id)
            .field("held", &*self.held.lock())
            .finish()
    }
}

impl FileLock {
    /// Lock for `resource`, recorded at `<resource>.lock` unless
    /// `options.lock_file_path` says otherwise.
    pub fn new(resource: impl AsRef<Path>, options: LockOptions) -> Self {
        Self::with_liveness(resource, options, Arc::new(OsLivenessChecker))
    }

    /// Same as [`FileLock::new`] with an explicit liveness probe.
    pub fn with_liveness(
        resource: impl AsRef<Path>,
        options: LockOptions,
        liveness: Arc<dyn ProcessLivenessChecker>,
    ) -> Self {
        let resource_path = resource.as_ref().to_path_buf();
        let lock_path = options.lock_path_for(&resource_path);
        Self {
            resource_path,
            lock_path,
            options,
            holder_id: uuid::Uuid::new_v4().to_string(),
            held: Mutex::new(None),
            liveness,
        }
    }

    /// Handle addressing an existing lock record path directly.
    pub fn for_lock_file(
        lock_path: impl AsRef<Path>,
        options: LockOptions,
        liveness: Arc<dyn ProcessLivenessChecker>,
    ) -> Self {
        let lock_path = lock_path.as_ref().to_path_buf();
        let resource = lock_path
            .to_str()
            .and_then(|s| s.strip_suffix(LOCK_FILE_SUFFIX))
            .map(PathBuf::from)
            .unwrap_or_else(|| lock_path.clone());
        Self::with_liveness(resource, options.with_lock_file_path(lock_path), liveness)
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Unique id this handle records as its holder entry.
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Whether this handle believes it holds the lock.
    pub fn is_locked(&self) -> bool {
        self.held.lock().is_some()
    }

    pub fn held_mode(&self) -> Option<LockMode> {
        *self.held.lock()
    }

    /// Acquire with this handle's options.
    pub async fn acquire(&mut self, mode: LockMode) -> LockResult<()> {
        let options = self.options.clone();
        self.acquire_with(mode, &options).await
    }

    /// Acquire with per-call options. `options.lock_file_path` is ignored;
    /// the record path is fixed when the handle is built.
    ///
    /// On error the caller did not enter the critical section.
    pub async fn acquire_with(&mut self, mode: LockMode, options: &LockOptions) -> LockResult<()> {
        if self.is_locked() {
            return Err(LockError::AlreadyHeld {
                path: self.lock_path.clone(),
            });
        }

        let started = Instant::now();
        let deadline = started + options.timeout;

        loop {
            let holder = match self.attempt(mode, options, deadline).await? {
                Attempt::Acquired => {
                    *self.held.lock() = Some(mode);
                    debug!(
                        path = %self.lock_path.display(),
                        %mode,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "lock acquired"
                    );
                    return Ok(());
                }
                Attempt::Busy(holder) => holder,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timeout_error(started.elapsed(), Some(holder)));
            }
            tokio::time::sleep(options.retry_interval.min(deadline - now)).await;
        }
    }

    /// Single attempt; `true` if the lock is now held.
    pub async fn try_acquire(&mut self, mode: LockMode) -> LockResult<bool> {
        let options = self.options.clone().with_timeout(Duration::ZERO);
        match self.acquire_with(mode, &options).await {
            Ok(()) => Ok(true),
            Err(LockError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release, logging instead of returning failures.
    pub async fn release(&mut self) {
        if let Err(e) = self.try_release().await {
            self.log_release_failure(&e);
        }
    }

    /// Release, surfacing failures. `NotHeld` when this handle holds nothing
    /// or its entry vanished from the record.
    pub async fn try_release(&mut self) -> LockResult<()> {
        if !self.is_locked() {
            return Err(LockError::NotHeld {
                path: self.lock_path.clone(),
            });
        }

        let mutex = self
            .lock_mutex(Instant::now() + RELEASE_MUTEX_WAIT)
            .await?
            .ok_or_else(|| self.timeout_error(RELEASE_MUTEX_WAIT, None))?;
        self.finish_release(mutex)
    }

    /// Delete the record regardless of who holds it. Returns whether a record
    /// existed. Intended for crash recovery.
    pub async fn force_release(&self) -> LockResult<bool> {
        let mutex = match self.lock_mutex(Instant::now() + FORCE_MUTEX_WAIT).await {
            Ok(Some(mutex)) => Some(mutex),
            Ok(None) => {
                warn!(
                    path = %self.lock_path.display(),
                    "record mutex busy; force releasing without it"
                );
                None
            }
            Err(e) => {
                warn!(
                    path = %self.lock_path.display(),
                    error = %e,
                    "could not take record mutex; force releasing without it"
                );
                None
            }
        };

        let existed = remove_record(&self.lock_path)?;
        if let Some(mutex) = mutex
            && let Err(e) = mutex.unlock()
        {
            warn!(path = %self.lock_path.display(), error = %e, "failed to remove record mutex");
        }
        *self.held.lock() = None;

        if existed {
            info!(path = %self.lock_path.display(), "lock force released");
        }
        Ok(existed)
    }

    /// Delete the record only if it is still orphaned: stale under this
    /// handle's `stale_timeout` and every holder pid confirmed dead. The check
    /// is repeated under the record mutex, so a record claimed after the
    /// caller looked is left alone. Returns whether the record was removed.
    pub async fn reclaim_orphaned(&self) -> LockResult<bool> {
        let mutex = self
            .lock_mutex(Instant::now() + RELEASE_MUTEX_WAIT)
            .await?
            .ok_or_else(|| self.timeout_error(RELEASE_MUTEX_WAIT, None))?;
        let result = self.reclaim_locked();
        if let Err(e) = mutex.unlock() {
            warn!(path = %self.lock_path.display(), error = %e, "failed to remove record mutex");
        }
        result
    }

    /// Read-only snapshot of the record. Never blocks on the record mutex and
    /// never mutates anything.
    pub fn get_info(&self) -> LockResult<LockInfo> {
        Ok(match read_record(&self.lock_path)? {
            RecordState::Absent => LockInfo::unlocked(self.lock_path.clone()),
            RecordState::Present(record) => self.info_from_record(&record),
            RecordState::Unreadable { modified, reason } => {
                debug!(path = %self.lock_path.display(), %reason, "unreadable lock record");
                let mut info = LockInfo::unlocked(self.lock_path.clone());
                info.status = LockStatus::LockedByOther;
                info.updated_at = modified;
                info.is_stale =
                    modified.map(|at| record::is_older_than(at, self.options.stale_timeout));
                info
            }
        })
    }

    /// Release anything held and remove this handle's leftovers. Logs and
    /// swallows every failure.
    pub async fn cleanup(&mut self) {
        if self.is_locked() {
            self.release().await;
        }

        match guard::remove_if_owned(&self.lock_path, &self.holder_id) {
            Ok(true) => debug!(path = %self.lock_path.display(), "removed leftover record mutex"),
            Ok(false) => {}
            Err(e) => warn!(path = %self.lock_path.display(), error = %e, "cleanup: mutex removal failed"),
        }

        // Temp files are only written under the mutex; take it so a sibling
        // handle in this process is not mid-rewrite.
        match self.lock_mutex(Instant::now() + RELEASE_MUTEX_WAIT).await {
            Ok(Some(mutex)) => {
                match remove_own_temp_files(&self.lock_path) {
                    Ok(0) => {}
                    Ok(n) => debug!(path = %self.lock_path.display(), removed = n, "removed temp files"),
                    Err(e) => warn!(path = %self.lock_path.display(), error = %e, "cleanup: temp file removal failed"),
                }
                if let Err(e) = mutex.unlock() {
                    warn!(path = %self.lock_path.display(), error = %e, "cleanup: failed to remove record mutex");
                }
            }
            Ok(None) => warn!(path = %self.lock_path.display(), "cleanup: record mutex busy; temp files left"),
            Err(e) => warn!(path = %self.lock_path.display(), error = %e, "cleanup: could not take record mutex"),
        }
    }

    /// Run `f` inside the lock. The lock is released whether `f` succeeds or
    /// fails; release failures are logged, `f`'s result is returned.
    pub async fn with_lock<F, Fut, T, E>(&mut self, mode: LockMode, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<LockError>,
    {
        self.acquire(mode).await?;
        let result = f().await;
        self.release().await;
        result
    }

    fn info_from_record(&self, record: &LockRecord) -> LockInfo {
        let status = if record.holds(&self.holder_id) {
            LockStatus::Locked
        } else {
            LockStatus::LockedByOther
        };
        LockInfo {
            status,
            lock_file_path: self.lock_path.clone(),
            pid: Some(record.current_pid()),
            mode: Some(record.mode),
            shared_count: (record.mode == LockMode::Shared).then_some(record.holders.len()),
            holder_pids: record.holder_pids(),
            created_at: Some(record.created_at),
            updated_at: Some(record.updated_at),
            is_stale: Some(record.is_stale(self.options.stale_timeout)),
        }
    }

    async fn attempt(
        &self,
        mode: LockMode,
        options: &LockOptions,
        deadline: Instant,
    ) -> LockResult<Attempt> {
        let mutex_deadline = deadline.max(Instant::now() + MUTEX_MIN_WAIT);
        let Some(mutex) = self.lock_mutex(mutex_deadline).await? else {
            return Ok(Attempt::Busy(self.observe_holder()));
        };

        let outcome = self.attempt_locked(mode, options);
        if let Err(e) = mutex.unlock() {
            warn!(path = %self.lock_path.display(), error = %e, "failed to remove record mutex");
        }
        outcome
    }

    /// Claim, join, or reclaim. Caller holds the record mutex.
    fn attempt_locked(&self, mode: LockMode, options: &LockOptions) -> LockResult<Attempt> {
        let mut existing = match read_record(&self.lock_path)? {
            RecordState::Absent => return self.claim(mode),
            RecordState::Present(record) => record,
            RecordState::Unreadable { .. } => {
                return Ok(Attempt::Busy(HolderState::default()));
            }
        };

        if options.auto_cleanup && existing.is_stale(options.stale_timeout) {
            let dead: Vec<u32> = existing
                .holder_pids()
                .into_iter()
                .filter(|pid| !self.liveness.exists(*pid))
                .collect();

            if !dead.is_empty() {
                existing.prune_pids(&dead);
                if existing.holders.is_empty() {
                    warn!(
                        path = %self.lock_path.display(),
                        pids = ?dead,
                        age = %existing.age_string(),
                        "reclaiming orphaned lock"
                    );
                    remove_record(&self.lock_path)?;
                    return self.claim(mode);
                }
                info!(
                    path = %self.lock_path.display(),
                    pids = ?dead,
                    "pruned dead shared holders"
                );
                if existing.mode.is_compatible_with(mode) {
                    return self.join(existing);
                }
                write_record(&self.lock_path, &existing)?;
            }
        }

        if existing.mode.is_compatible_with(mode) {
            return self.join(existing);
        }

        Ok(Attempt::Busy(holder_state(&existing)))
    }

    fn claim(&self, mode: LockMode) -> LockResult<Attempt> {
        write_record(&self.lock_path, &LockRecord::claim(mode, &self.holder_id))?;
        Ok(Attempt::Acquired)
    }

    fn join(&self, mut record: LockRecord) -> LockResult<Attempt> {
        record.join(&self.holder_id);
        write_record(&self.lock_path, &record)?;
        debug!(
            path = %self.lock_path.display(),
            holders = record.holders.len(),
            "joined shared lock"
        );
        Ok(Attempt::Acquired)
    }

    fn reclaim_locked(&self) -> LockResult<bool> {
        let RecordState::Present(record) = read_record(&self.lock_path)? else {
            return Ok(false);
        };
        if !record.is_stale(self.options.stale_timeout) {
            return Ok(false);
        }
        let pids = record.holder_pids();
        if pids.iter().any(|pid| self.liveness.exists(*pid)) {
            return Ok(false);
        }

        let existed = remove_record(&self.lock_path)?;
        if existed {
            warn!(
                path = %self.lock_path.display(),
                pids = ?pids,
                age = %record.age_string(),
                "reclaimed orphaned lock"
            );
        }
        Ok(existed)
    }

    /// Leave the record. Caller holds the record mutex.
    fn finish_release(&self, mutex: RecordMutex) -> LockResult<()> {
        let result = self.leave_locked();
        if let Err(e) = mutex.unlock() {
            warn!(path = %self.lock_path.display(), error = %e, "failed to remove record mutex");
        }
        match &result {
            Ok(()) | Err(LockError::NotHeld { .. }) => *self.held.lock() = None,
            Err(_) => {}
        }
        result
    }

    fn leave_locked(&self) -> LockResult<()> {
        let mut record = match read_record(&self.lock_path)? {
            RecordState::Present(record) => record,
            RecordState::Absent => {
                return Err(LockError::NotHeld {
                    path: self.lock_path.clone(),
                });
            }
            RecordState::Unreadable { reason, .. } => {
                return Err(LockError::Record {
                    path: self.lock_path.clone(),
                    message: reason,
                });
            }
        };

        if !record.remove_holder(&self.holder_id) {
            return Err(LockError::NotHeld {
                path: self.lock_path.clone(),
            });
        }

        if record.mode == LockMode::Exclusive || record.holders.is_empty() {
            remove_record(&self.lock_path)?;
            debug!(path = %self.lock_path.display(), "lock released, record removed");
        } else {
            write_record(&self.lock_path, &record)?;
            debug!(
                path = %self.lock_path.display(),
                remaining = record.holders.len(),
                "left shared lock"
            );
        }
        Ok(())
    }

    async fn lock_mutex(&self, deadline: Instant) -> LockResult<Option<RecordMutex>> {
        loop {
            if let Some(mutex) =
                RecordMutex::try_lock(&self.lock_path, &self.holder_id, self.liveness.as_ref())?
            {
                return Ok(Some(mutex));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(MUTEX_SPIN.min(deadline - now)).await;
        }
    }

    fn lock_mutex_blocking(&self, deadline: Instant) -> LockResult<Option<RecordMutex>> {
        loop {
            if let Some(mutex) =
                RecordMutex::try_lock(&self.lock_path, &self.holder_id, self.liveness.as_ref())?
            {
                return Ok(Some(mutex));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(MUTEX_SPIN.min(deadline - now));
        }
    }

    /// Best guess at the current holder without the mutex.
    fn observe_holder(&self) -> HolderState {
        match read_record(&self.lock_path) {
            Ok(RecordState::Present(record)) => holder_state(&record),
            _ => HolderState::default(),
        }
    }

    /// Probe every holder pid; the lock counts as held by a live process
    /// when any of them is running.
    fn timeout_error(&self, waited: Duration, holder: Option<HolderState>) -> LockError {
        let holder = holder.map(|mut state| {
            if !state.pids.is_empty() {
                let alive = state.pids.iter().copied().find(|pid| self.liveness.exists(*pid));
                state.alive = Some(alive.is_some());
                if alive.is_some() {
                    state.pid = alive;
                }
            }
            state
        });
        LockError::Timeout {
            path: self.lock_path.clone(),
            waited,
            holder,
        }
    }

    fn log_release_failure(&self, e: &LockError) {
        match e {
            LockError::NotHeld { .. } => {
                debug!(path = %self.lock_path.display(), "release: {}", e)
            }
            _ => warn!(path = %self.lock_path.display(), error = %e, "release failed"),
        }
    }
}

fn holder_state(record: &LockRecord) -> HolderState {
    HolderState {
        pid: Some(record.current_pid()),
        pids: record.holder_pids(),
        mode: Some(record.mode),
        alive: None,
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if !self.is_locked() {
            return;
        }
        warn!(
            path = %self.lock_path.display(),
            "FileLock dropped while held; releasing synchronously"
        );
        let result = self
            .lock_mutex_blocking(Instant::now() + MUTEX_MIN_WAIT)
            .and_then(|mutex| {
                mutex
                    .ok_or_else(|| self.timeout_error(MUTEX_MIN_WAIT, None))
                    .and_then(|mutex| self.finish_release(mutex))
            });
        if let Err(e) = result {
            self.log_release_failure(&e);
        }
    }
}
