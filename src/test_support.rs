use crate::locks::{LockMode, LockRecord, ProcessLivenessChecker, write_record};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Liveness double: every pid is alive unless listed as dead.
#[derive(Debug, Default)]
pub(crate) struct FixedLiveness {
    dead: Mutex<HashSet<u32>>,
}

impl FixedLiveness {
    pub(crate) fn all_alive() -> Self {
        Self::default()
    }

    pub(crate) fn dead(pids: &[u32]) -> Self {
        Self {
            dead: Mutex::new(pids.iter().copied().collect()),
        }
    }

    pub(crate) fn kill(&self, pid: u32) {
        self.dead.lock().insert(pid);
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl ProcessLivenessChecker for FixedLiveness {
    fn exists(&self, pid: u32) -> bool {
        !self.dead.lock().contains(&pid)
    }
}

/// Write a record that looks like it was claimed by `pid` `age` ago.
pub(crate) fn write_foreign_record(
    lock_path: &Path,
    mode: LockMode,
    pid: u32,
    age: chrono::Duration,
) -> LockRecord {
    let mut record = LockRecord::claim(mode, &format!("foreign-{}", pid));
    let at = Utc::now() - age;
    record.pid = pid;
    record.created_at = at;
    record.updated_at = at;
    for holder in &mut record.holders {
        holder.pid = pid;
        holder.joined_at = at;
    }
    write_record(lock_path, &record).unwrap();
    record
}
