//! File-based reader/writer locking for shared on-disk state.
//!
//! Writers of shared JSON/JSONL files bracket every mutation with
//! `acquire(Exclusive)` / `release()`; multi-record consistent reads may use
//! `acquire(Shared)`. The lock only guarantees exclusion, never the content of
//! the critical section.
//!
//! # Lock Files
//!
//! The record for `records.json` lives at `records.json.lock` (overridable).
//! It is plain JSON so operators can inspect it without tooling; see
//! [`record`] for the format. A sibling `records.json.lock.mutex`, created with
//! **create_new** semantics, serializes every change to the record.
//!
//! # Staleness
//!
//! A record is *stale* when its `updated_at` is older than the configured
//! threshold. Stale is advisory. A record is *orphaned* when it is stale and
//! every holder pid is confirmed dead by a [`ProcessLivenessChecker`]; only
//! orphaned records are reclaimed automatically.

mod file_lock;
pub(crate) mod guard;
mod liveness;
pub mod record;
mod types;


// Re-export public API
pub use file_lock::FileLock;
pub use liveness::{OsLivenessChecker, ProcessLivenessChecker};
pub use record::{HolderEntry, LockRecord, RecordState, read_record, remove_record, write_record};
pub use types::{
    DEFAULT_RETRY_INTERVAL, DEFAULT_STALE_TIMEOUT, DEFAULT_TIMEOUT, LOCK_FILE_SUFFIX, LockInfo,
    LockMode, LockOptions, LockStatus, default_lock_path,
};
