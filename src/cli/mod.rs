//! CLI argument parsing for prism-gateway.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// prism-gateway: operate on the file locks guarding shared on-disk state.
///
/// Locks are `<resource>.lock` JSON records next to the file they protect.
/// Use `lock` to inspect, hold or clear a single lock and `monitor` to scan
/// lock records for stale and orphaned entries.
#[derive(Parser, Debug)]
#[command(name = "prism-gateway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: prism-gateway.yaml in the working directory, if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for prism-gateway.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Inspect or operate on a single lock.
    Lock(LockCommand),

    /// Scan lock records for stale and orphaned locks.
    Monitor(MonitorCommand),
}

/// Lock subcommands.
#[derive(Parser, Debug)]
pub struct LockCommand {
    #[command(subcommand)]
    pub action: LockAction,
}

/// Available lock actions.
#[derive(Subcommand, Debug)]
pub enum LockAction {
    /// Show the current state of a lock.
    Status(LockStatusArgs),

    /// Acquire a lock and hold it.
    ///
    /// Holds for --hold-ms, or until Ctrl-C when omitted, then releases.
    Acquire(LockAcquireArgs),

    /// Delete a lock record regardless of its holder.
    ///
    /// Requires --force flag to prevent accidental clearing.
    ForceRelease(LockForceReleaseArgs),
}

/// Arguments for the `lock status` command.
#[derive(Parser, Debug)]
pub struct LockStatusArgs {
    /// Resource the lock protects (the lock record is `<resource>.lock`).
    pub resource: PathBuf,

    /// Lock record path, when not `<resource>.lock`.
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `lock acquire` command.
#[derive(Parser, Debug)]
pub struct LockAcquireArgs {
    pub resource: PathBuf,

    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Acquire in shared mode instead of exclusive.
    #[arg(long)]
    pub shared: bool,

    /// Maximum wait in milliseconds (overrides config).
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Hold for this many milliseconds, then release.
    #[arg(long)]
    pub hold_ms: Option<u64>,
}

/// Arguments for the `lock force-release` command.
#[derive(Parser, Debug)]
pub struct LockForceReleaseArgs {
    pub resource: PathBuf,

    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Force clearing the lock (required for safety).
    #[arg(long)]
    pub force: bool,
}

/// Monitor subcommands.
#[derive(Parser, Debug)]
pub struct MonitorCommand {
    #[command(subcommand)]
    pub action: MonitorAction,
}

/// Available monitor actions.
#[derive(Subcommand, Debug)]
pub enum MonitorAction {
    /// Run one scan and print stale locks.
    Scan(MonitorScanArgs),

    /// Scan periodically until Ctrl-C.
    Run(MonitorRunArgs),
}

/// Arguments for the `monitor scan` command.
#[derive(Parser, Debug)]
pub struct MonitorScanArgs {
    /// Lock record paths to scan, in addition to `monitor.watch` from config.
    pub locks: Vec<PathBuf>,

    /// Report orphans without reclaiming them.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `monitor run` command.
#[derive(Parser, Debug)]
pub struct MonitorRunArgs {
    pub locks: Vec<PathBuf>,

    /// Scan interval in milliseconds (overrides config).
    #[arg(long)]
    pub interval_ms: Option<u64>,

    #[arg(long)]
    pub no_cleanup: bool,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        // Verifies the CLI arguments configuration is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_lock_status() {
        let cli = Cli::try_parse_from(["prism-gateway", "lock", "status", "data/tasks.jsonl"])
            .unwrap();
        assert!(cli.config.is_none());
        match cli.command {
            Command::Lock(LockCommand {
                action: LockAction::Status(args),
            }) => {
                assert_eq!(args.resource, PathBuf::from("data/tasks.jsonl"));
                assert!(args.lock_file.is_none());
                assert!(!args.json);
            }
            other => panic!("Expected lock status, got {:?}", other),
        }
    }

    #[test]
    fn parse_lock_acquire_full() {
        let cli = Cli::try_parse_from([
            "prism-gateway",
            "lock",
            "acquire",
            "tasks.jsonl",
            "--shared",
            "--timeout-ms",
            "500",
            "--hold-ms",
            "2000",
            "--lock-file",
            "/tmp/tasks.lock",
        ])
        .unwrap();
        match cli.command {
            Command::Lock(LockCommand {
                action: LockAction::Acquire(args),
            }) => {
                assert!(args.shared);
                assert_eq!(args.timeout_ms, Some(500));
                assert_eq!(args.hold_ms, Some(2000));
                assert_eq!(args.lock_file, Some(PathBuf::from("/tmp/tasks.lock")));
            }
            other => panic!("Expected lock acquire, got {:?}", other),
        }
    }

    #[test]
    fn parse_force_release_flag() {
        let cli = Cli::try_parse_from(["prism-gateway", "lock", "force-release", "a.json"])
            .unwrap();
        match cli.command {
            Command::Lock(LockCommand {
                action: LockAction::ForceRelease(args),
            }) => assert!(!args.force),
            other => panic!("Expected force-release, got {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "prism-gateway",
            "lock",
            "force-release",
            "a.json",
            "--force",
        ])
        .unwrap();
        match cli.command {
            Command::Lock(LockCommand {
                action: LockAction::ForceRelease(args),
            }) => assert!(args.force),
            other => panic!("Expected force-release, got {:?}", other),
        }
    }

    #[test]
    fn parse_monitor_scan_with_global_config() {
        let cli = Cli::try_parse_from([
            "prism-gateway",
            "monitor",
            "scan",
            "a.lock",
            "b.lock",
            "--config",
            "ops.yaml",
            "--no-cleanup",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ops.yaml")));
        match cli.command {
            Command::Monitor(MonitorCommand {
                action: MonitorAction::Scan(args),
            }) => {
                assert_eq!(args.locks.len(), 2);
                assert!(args.no_cleanup);
            }
            other => panic!("Expected monitor scan, got {:?}", other),
        }
    }

    #[test]
    fn parse_monitor_run() {
        let cli = Cli::try_parse_from(["prism-gateway", "monitor", "run", "--interval-ms", "250"])
            .unwrap();
        match cli.command {
            Command::Monitor(MonitorCommand {
                action: MonitorAction::Run(args),
            }) => {
                assert!(args.locks.is_empty());
                assert_eq!(args.interval_ms, Some(250));
            }
            other => panic!("Expected monitor run, got {:?}", other),
        }
    }

    #[test]
    fn parse_requires_subcommand() {
        assert!(Cli::try_parse_from(["prism-gateway"]).is_err());
        assert!(Cli::try_parse_from(["prism-gateway", "lock"]).is_err());
        assert!(Cli::try_parse_from(["prism-gateway", "lock", "release", "a"]).is_err());
    }
}
