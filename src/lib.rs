//! prism-gateway: file-based reader/writer locking for shared on-disk state.
//!
//! Processes that read and write the same JSON/JSONL files coordinate through
//! lock records on disk ([`locks`]). A [`monitor::LockMonitor`] watches those
//! records and reclaims locks left behind by processes that died.
//! [`store::LockedJsonStore`] is a record store built on the lock contract.

pub mod config;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod fs;
pub mod locks;
pub mod monitor;
pub mod store;

#[cfg(test)]
mod test_support;
