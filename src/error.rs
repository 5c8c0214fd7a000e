//! Error types for prism-gateway.
//!
//! Library code returns [`LockError`] from the locking core and
//! [`GatewayError`] from everything layered on top of it. Both use thiserror;
//! only the binary edge reaches for anyhow.

use crate::exit_codes;
use crate::locks::LockMode;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Stable machine-readable classification of a [`LockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The deadline passed while waiting to acquire.
    Timeout,
    /// Unexpected I/O failure or unreadable lock state.
    LockError,
    /// Release attempted by a handle that holds nothing.
    NotHeld,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::LockError => "LOCK_ERROR",
            ErrorCode::NotHeld => "NOT_HELD",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last observed holder of a lock, attached to timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderState {
    /// A holder to name in messages; a live one when any was found.
    pub pid: Option<u32>,
    /// Every holder pid on the record.
    pub pids: Vec<u32>,
    pub mode: Option<LockMode>,
    /// `Some(true)` when a liveness probe confirmed some holder is running,
    /// `Some(false)` when it confirmed all of them are gone, `None` if no
    /// probe was possible (unreadable record).
    pub alive: Option<bool>,
}

impl fmt::Display for HolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = self.mode.map(|m| m.as_str()).unwrap_or("unknown mode");
        match self.pid {
            Some(pid) => write!(f, "held {} by pid {}", mode, pid)?,
            None => write!(f, "held by an unreadable record")?,
        }
        if self.pids.len() > 1 {
            write!(f, " (+{} more)", self.pids.len() - 1)?;
        }
        match self.alive {
            Some(true) => write!(f, ", holder is alive"),
            Some(false) => write!(f, ", holder is dead but the lock is not stale yet"),
            None => write!(f, ", holder liveness unknown"),
        }
    }
}

fn describe_holder(holder: &Option<HolderState>) -> String {
    match holder {
        Some(state) => format!(" ({})", state),
        None => String::new(),
    }
}

/// Errors raised by the file-locking core.
///
/// Any error from `acquire` means the caller did NOT enter the critical
/// section and must not proceed.
#[derive(Error, Debug)]
pub enum LockError {
    /// The deadline passed before the lock could be acquired.
    #[error(
        "timed out after {}ms waiting for lock '{}'{}",
        .waited.as_millis(),
        .path.display(),
        describe_holder(.holder)
    )]
    Timeout {
        path: PathBuf,
        waited: Duration,
        holder: Option<HolderState>,
    },

    /// Unexpected filesystem failure while touching lock state.
    #[error("lock I/O failed on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The lock record could not be serialized or parsed.
    #[error("invalid lock record '{}': {message}", .path.display())]
    Record { path: PathBuf, message: String },

    /// Release requested by a handle that is not a recorded holder.
    #[error("lock '{}' is not held by this handle", .path.display())]
    NotHeld { path: PathBuf },

    /// Acquire requested on a handle that already holds the lock.
    #[error("lock '{}' is already held by this handle", .path.display())]
    AlreadyHeld { path: PathBuf },
}

impl LockError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LockError::Io {
            path: path.into(),
            source,
        }
    }

    /// The classification callers branch on.
    pub fn code(&self) -> ErrorCode {
        match self {
            LockError::Timeout { .. } => ErrorCode::Timeout,
            LockError::NotHeld { .. } => ErrorCode::NotHeld,
            LockError::Io { .. } | LockError::Record { .. } | LockError::AlreadyHeld { .. } => {
                ErrorCode::LockError
            }
        }
    }

    /// True when a timeout was caused by a holder confirmed to be running.
    pub fn is_held_by_live_process(&self) -> bool {
        matches!(
            self,
            LockError::Timeout {
                holder: Some(HolderState {
                    alive: Some(true),
                    ..
                }),
                ..
            }
        )
    }
}

/// Main error type for operations layered over the lock core.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// User provided invalid arguments or refused a required confirmation.
    #[error("{0}")]
    UserError(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A stored record could not be encoded or decoded.
    #[error("Store error: {0}")]
    StoreError(String),

    /// Lock acquisition or maintenance failed.
    #[error("Lock failure: {0}")]
    Lock(#[from] LockError),
}

impl GatewayError {
    /// Returns the appropriate exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            GatewayError::UserError(_) => exit_codes::USER_ERROR,
            GatewayError::ConfigError(_) => exit_codes::CONFIG_ERROR,
            GatewayError::StoreError(_) => exit_codes::LOCK_FAILURE,
            GatewayError::Lock(e) if e.code() == ErrorCode::Timeout => exit_codes::LOCK_TIMEOUT,
            GatewayError::Lock(_) => exit_codes::LOCK_FAILURE,
        }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for the locking core.
pub type LockResult<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn timeout_with(alive: Option<bool>) -> LockError {
        LockError::Timeout {
            path: PathBuf::from("/tmp/records.json.lock"),
            waited: Duration::from_millis(500),
            holder: Some(HolderState {
                pid: Some(42),
                pids: vec![42],
                mode: Some(LockMode::Exclusive),
                alive,
            }),
        }
    }

    #[test]
    fn timeout_has_timeout_code() {
        assert_eq!(timeout_with(Some(true)).code(), ErrorCode::Timeout);
        assert_eq!(ErrorCode::Timeout.to_string(), "TIMEOUT");
    }

    #[test]
    fn timeout_message_distinguishes_live_holder() {
        let live = timeout_with(Some(true));
        assert!(live.is_held_by_live_process());
        assert!(live.to_string().contains("held exclusive by pid 42, holder is alive"));

        let unknown = timeout_with(None);
        assert!(!unknown.is_held_by_live_process());
        assert!(unknown.to_string().contains("liveness unknown"));
    }

    #[test]
    fn io_and_record_errors_are_lock_errors() {
        let io = LockError::io("/x.lock", std::io::Error::other("disk on fire"));
        assert_eq!(io.code(), ErrorCode::LockError);
        assert!(io.to_string().contains("disk on fire"));

        let rec = LockError::Record {
            path: PathBuf::from("/x.lock"),
            message: "bad json".to_string(),
        };
        assert_eq!(rec.code(), ErrorCode::LockError);
    }

    #[test]
    fn not_held_has_not_held_code() {
        let err = LockError::NotHeld {
            path: PathBuf::from("/x.lock"),
        };
        assert_eq!(err.code(), ErrorCode::NotHeld);
        assert_eq!(err.code().as_str(), "NOT_HELD");
    }

    #[test]
    fn gateway_errors_map_to_exit_codes() {
        assert_eq!(
            GatewayError::UserError("no".into()).exit_code(),
            exit_codes::USER_ERROR
        );
        assert_eq!(
            GatewayError::ConfigError("bad".into()).exit_code(),
            exit_codes::CONFIG_ERROR
        );
        assert_eq!(
            GatewayError::from(timeout_with(Some(true))).exit_code(),
            exit_codes::LOCK_TIMEOUT
        );
        assert_eq!(
            GatewayError::from(LockError::NotHeld {
                path: PathBuf::from("/x.lock")
            })
            .exit_code(),
            exit_codes::LOCK_FAILURE
        );
    }
}
