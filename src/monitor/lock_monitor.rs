use super::history::EventHistory;
use super::scheduler::RepeatingTask;
use super::types::{LockEvent, LockEventType, MonitorOptions, MonitorStats};
use crate::events;
use crate::locks::{FileLock, LockInfo, LockOptions, OsLivenessChecker, ProcessLivenessChecker};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Watches lock record paths, reports stale locks and reclaims orphans.
///
/// Share it as `Arc<LockMonitor>`; `start()` needs the `Arc` so the periodic
/// task can reach the monitor without keeping it alive.
pub struct LockMonitor {
    options: MonitorOptions,
    liveness: Arc<dyn ProcessLivenessChecker>,
    watched: Mutex<BTreeMap<PathBuf, Arc<FileLock>>>,
    stats: Mutex<MonitorStats>,
    history: Mutex<EventHistory>,
    running: AtomicBool,
    task: tokio::sync::Mutex<Option<RepeatingTask>>,
}

impl std::fmt::Debug for LockMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockMonitor")
            .field("options", &self.options)
            .field("watched", &self.monitored_locks())
            .field("running", &self.is_running())
            .field("history_len", &self.history.lock().len())
            .finish()
    }
}

impl LockMonitor {
    pub fn new(options: MonitorOptions) -> Self {
        Self::with_liveness(options, Arc::new(OsLivenessChecker))
    }

    pub fn with_liveness(
        options: MonitorOptions,
        liveness: Arc<dyn ProcessLivenessChecker>,
    ) -> Self {
        let history = EventHistory::new(options.max_history_records);
        Self {
            options,
            liveness,
            watched: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(MonitorStats::default()),
            history: Mutex::new(history),
            running: AtomicBool::new(false),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Scan once right away, then every `scan_interval` until [`stop`].
    /// No-op when already running.
    ///
    /// [`stop`]: LockMonitor::stop
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("lock monitor already running");
            return;
        }

        self.stats.lock().started_at = Some(Utc::now());
        self.running.store(true, Ordering::SeqCst);
        info!(
            interval_ms = self.options.scan_interval.as_millis() as u64,
            watched = self.watched.lock().len(),
            "lock monitor started"
        );

        self.scan().await;

        let monitor: Weak<Self> = Arc::downgrade(self);
        *task = Some(RepeatingTask::spawn(
            "lock-monitor-scan",
            self.options.scan_interval,
            move || {
                let monitor = monitor.clone();
                async move {
                    if let Some(monitor) = monitor.upgrade() {
                        monitor.scan().await;
                    }
                }
            },
        ));
    }

    /// Cancel periodic scans and run one final scan. A scan already in
    /// progress finishes first. No-op when not running.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(repeating) = task.take() else {
            debug!("lock monitor not running");
            return;
        };

        repeating.cancel().await;
        self.running.store(false, Ordering::SeqCst);
        self.scan().await;
        info!("lock monitor stopped");
    }

    /// Watch the lock record at `lock_path`. Safe while running.
    pub fn monitor_lock(&self, lock_path: impl AsRef<Path>) {
        let lock_path = lock_path.as_ref().to_path_buf();
        let mut watched = self.watched.lock();
        if watched.contains_key(&lock_path) {
            return;
        }
        let options = LockOptions::default()
            .with_stale_timeout(self.options.stale_timeout)
            .with_auto_cleanup(self.options.auto_cleanup);
        let lock = FileLock::for_lock_file(&lock_path, options, self.liveness.clone());
        debug!(path = %lock_path.display(), "watching lock");
        watched.insert(lock_path, Arc::new(lock));
    }

    /// Stop watching `lock_path`. Returns whether it was watched.
    pub fn unmonitor_lock(&self, lock_path: impl AsRef<Path>) -> bool {
        self.watched.lock().remove(lock_path.as_ref()).is_some()
    }

    pub fn monitored_locks(&self) -> Vec<PathBuf> {
        self.watched.lock().keys().cloned().collect()
    }

    /// One pass over every watched path. Returns the stale locks found.
    ///
    /// Orphaned locks (stale, every holder confirmed dead) are reclaimed when
    /// `auto_cleanup` is set. Stale locks with a live holder, or whose record
    /// cannot be parsed, are reported and left alone. Failures on one path are
    /// logged and the pass moves on.
    pub async fn scan(&self) -> Vec<LockInfo> {
        let watched: Vec<(PathBuf, Arc<FileLock>)> = self
            .watched
            .lock()
            .iter()
            .map(|(path, lock)| (path.clone(), lock.clone()))
            .collect();

        let mut problems = Vec::new();
        let mut held = 0usize;

        for (path, lock) in &watched {
            let info = match lock.get_info() {
                Ok(info) => info,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "scan: failed to inspect lock");
                    continue;
                }
            };
            if info.is_locked() {
                held += 1;
            }
            if !info.is_stale() {
                continue;
            }

            self.stats.lock().stale_locks_found += 1;
            self.record(LockEvent::new(LockEventType::StaleDetected, path).with_details(json!({
                "pid": info.pid,
                "mode": info.mode,
                "holder_pids": info.holder_pids,
                "updated_at": info.updated_at,
            })));

            self.handle_stale(path, lock, &info).await;
            problems.push(info);
        }

        let now = Utc::now();
        {
            let mut stats = self.stats.lock();
            stats.scan_count += 1;
            stats.last_scan_time = Some(now);
            stats.last_scan_lock_count = held;
        }
        self.record(
            LockEvent::new(LockEventType::ScanCompleted, Path::new("")).with_details(json!({
                "watched": watched.len(),
                "locked": held,
                "stale": problems.len(),
            })),
        );
        debug!(
            watched = watched.len(),
            locked = held,
            stale = problems.len(),
            "lock scan completed"
        );

        problems
    }

    async fn handle_stale(&self, path: &Path, lock: &FileLock, info: &LockInfo) {
        if info.holder_pids.is_empty() {
            warn!(
                path = %path.display(),
                "stale lock record is unreadable; leaving it for an operator"
            );
            return;
        }

        let alive: Vec<u32> = info
            .holder_pids
            .iter()
            .copied()
            .filter(|pid| self.liveness.exists(*pid))
            .collect();
        if !alive.is_empty() {
            info!(
                path = %path.display(),
                pids = ?alive,
                "stale lock is held by a live process"
            );
            return;
        }

        self.record(
            LockEvent::new(LockEventType::OrphanDetected, path)
                .with_details(json!({ "pids": info.holder_pids })),
        );
        if !self.options.auto_cleanup {
            return;
        }

        match lock.reclaim_orphaned().await {
            Ok(true) => {
                self.stats.lock().locks_cleaned += 1;
                self.record(
                    LockEvent::new(LockEventType::Cleaned, path)
                        .with_details(json!({ "pids": info.holder_pids })),
                );
            }
            Ok(false) => {
                debug!(path = %path.display(), "lock changed before cleanup; skipped");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to clean orphaned lock");
                self.record(
                    LockEvent::new(LockEventType::CleanupFailed, path)
                        .with_details(json!({ "error": e.to_string() })),
                );
            }
        }
    }

    /// Run one scan now. Returns how many locks it cleaned.
    pub async fn cleanup_now(&self) -> u64 {
        let before = self.stats.lock().locks_cleaned;
        self.scan().await;
        self.stats.lock().locks_cleaned.saturating_sub(before)
    }

    pub fn get_stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    /// Zero the counters. `started_at` survives while running.
    pub fn reset_stats(&self) {
        let mut stats = self.stats.lock();
        let started_at = if self.is_running() {
            stats.started_at
        } else {
            None
        };
        *stats = MonitorStats {
            started_at,
            ..MonitorStats::default()
        };
    }

    /// Most recent events first, at most `limit` of them.
    pub fn get_event_history(&self, limit: Option<usize>) -> Vec<LockEvent> {
        self.history.lock().recent(limit)
    }

    fn record(&self, event: LockEvent) {
        match event.event_type {
            LockEventType::ScanCompleted => {}
            LockEventType::StaleDetected | LockEventType::OrphanDetected => info!(
                event = %event.event_type,
                path = %event.lock_path.display(),
                "lock event"
            ),
            LockEventType::Cleaned | LockEventType::CleanupFailed => warn!(
                event = %event.event_type,
                path = %event.lock_path.display(),
                "lock event"
            ),
        }

        if let Some(log) = &self.options.audit_log_path
            && let Err(e) = events::append_event(log, &event)
        {
            warn!(path = %log.display(), error = %e, "failed to append audit log");
        }
        self.history.lock().push(event);
    }
}
