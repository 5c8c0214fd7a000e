//! Exit code constants for the prism-gateway CLI.
//!
//! - 0: Success
//! - 1: User error (bad args, refused operation)
//! - 2: Configuration error
//! - 4: Lock failure (I/O trouble, record corruption, ownership mismatch)
//! - 5: Lock acquisition timed out

/// Successful execution.
pub const SUCCESS: i32 = 0;

/// User error: bad arguments or an operation refused without confirmation.
pub const USER_ERROR: i32 = 1;

/// Configuration file could not be read, parsed, or validated.
pub const CONFIG_ERROR: i32 = 2;

/// Lock failure other than a timeout.
pub const LOCK_FAILURE: i32 = 4;

/// The deadline passed while waiting for a lock.
pub const LOCK_TIMEOUT: i32 = 5;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [SUCCESS, USER_ERROR, CONFIG_ERROR, LOCK_FAILURE, LOCK_TIMEOUT];
        for (i, &a) in codes.iter().enumerate() {
            for (j, &b) in codes.iter().enumerate() {
                if i != j {
                    assert_ne!(a, b, "Exit codes must be distinct");
                }
            }
        }
    }

    #[test]
    fn exit_codes_fit_in_a_byte() {
        for code in [SUCCESS, USER_ERROR, CONFIG_ERROR, LOCK_FAILURE, LOCK_TIMEOUT] {
            assert!((0..=255).contains(&code));
        }
    }
}
