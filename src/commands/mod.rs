//! Command implementations for prism-gateway.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod lock;
mod monitor;

use crate::cli::{Command, LockAction, LockCommand, MonitorAction, MonitorCommand};
use prism_gateway::config::Config;
use prism_gateway::error::Result;

/// Dispatch a command to its implementation.
pub async fn dispatch(config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Lock(lock_cmd) => dispatch_lock(config, lock_cmd).await,
        Command::Monitor(monitor_cmd) => dispatch_monitor(config, monitor_cmd).await,
    }
}

async fn dispatch_lock(config: &Config, lock_cmd: LockCommand) -> Result<()> {
    match lock_cmd.action {
        LockAction::Status(args) => lock::cmd_lock_status(config, args).await,
        LockAction::Acquire(args) => lock::cmd_lock_acquire(config, args).await,
        LockAction::ForceRelease(args) => lock::cmd_lock_force_release(config, args).await,
    }
}

async fn dispatch_monitor(config: &Config, monitor_cmd: MonitorCommand) -> Result<()> {
    match monitor_cmd.action {
        MonitorAction::Scan(args) => monitor::cmd_monitor_scan(config, args).await,
        MonitorAction::Run(args) => monitor::cmd_monitor_run(config, args).await,
    }
}
