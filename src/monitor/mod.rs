//! Background supervision of lock records.
//!
//! A [`LockMonitor`] holds a registry of lock record paths and scans them,
//! once on demand or periodically after `start()`. Each scan reports stale
//! records and, with `auto_cleanup`, reclaims orphaned ones: stale records
//! whose every holder pid is confirmed dead. A stale record with a live holder
//! is only reported. Everything the monitor observes lands in a bounded event
//! history and, optionally, an NDJSON audit log (see [`crate::events`]).

mod default;
mod history;
mod lock_monitor;
pub mod scheduler;
mod types;


pub use default::default_monitor;
pub use lock_monitor::LockMonitor;
pub use scheduler::RepeatingTask;
pub use types::{
    DEFAULT_MAX_HISTORY, DEFAULT_SCAN_INTERVAL, LockEvent, LockEventType, MonitorOptions,
    MonitorStats,
};
