//! Local process liveness probing.
//!
//! A lock is only reclaimed once its holder is confirmed dead, so every probe
//! errs towards "alive": a wrong "alive" costs a delayed reclaim, a wrong
//! "dead" corrupts shared state.

use tracing::debug;

/// Answers whether a pid on this host still refers to a running process.
pub trait ProcessLivenessChecker: Send + Sync {
    fn exists(&self, pid: u32) -> bool;
}

/// Probe backed by the operating system's process table.
///
/// - Unix: `kill(pid, 0)`. `ESRCH` means gone, `EPERM` means it exists but
///   belongs to someone else. Anything else is treated as alive.
/// - Other platforms: `tasklist` lookup; failure to run it counts as alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLivenessChecker;

impl ProcessLivenessChecker for OsLivenessChecker {
    fn exists(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        if pid == std::process::id() {
            return true;
        }
        probe(pid)
    }
}

#[cfg(unix)]
fn probe(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        debug!(pid, "pid outside pid_t range; assuming alive");
        return true;
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(Errno::EPERM) => true,
        Err(e) => {
            debug!(pid, error = %e, "liveness probe failed; assuming alive");
            true
        }
    }
}

#[cfg(not(unix))]
fn probe(pid: u32) -> bool {
    use std::process::Command;

    match Command::new("tasklist")
        .args(["/FI", &format!("PID eq {}", pid), "/NH", "/FO", "CSV"])
        .output()
    {
        Ok(out) if out.status.success() => {
            let stdout = String::from_utf8_lossy(&out.stdout);
            let needle = format!("\"{}\"", pid);
            stdout.lines().any(|line| line.contains(&needle))
        }
        Ok(out) => {
            debug!(pid, status = ?out.status, "tasklist failed; assuming alive");
            true
        }
        Err(e) => {
            debug!(pid, error = %e, "could not run tasklist; assuming alive");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(OsLivenessChecker.exists(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_a_holder() {
        assert!(!OsLivenessChecker.exists(0));
    }

    #[cfg(unix)]
    #[test]
    fn reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        assert!(!OsLivenessChecker.exists(pid));
    }

    #[cfg(unix)]
    #[test]
    fn nonexistent_pid_is_dead() {
        // Far above any Linux pid_max.
        assert!(!OsLivenessChecker.exists(999_999_999));
    }

    #[cfg(unix)]
    #[test]
    fn out_of_range_pid_is_assumed_alive() {
        assert!(OsLivenessChecker.exists(u32::MAX));
    }

    #[cfg(unix)]
    #[test]
    fn init_process_counts_as_alive_even_without_permission() {
        // pid 1 always exists; unprivileged probes get EPERM.
        assert!(OsLivenessChecker.exists(1));
    }
}
