//! Implementation of the `prism-gateway lock` commands.

use crate::cli::{LockAcquireArgs, LockForceReleaseArgs, LockStatusArgs};
use prism_gateway::config::Config;
use prism_gateway::error::{GatewayError, Result};
use prism_gateway::locks::{FileLock, LockInfo, LockMode, LockOptions, LockStatus};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn options_for(config: &Config, lock_file: Option<&PathBuf>) -> LockOptions {
    let options = config.lock_options();
    match lock_file {
        Some(path) => options.with_lock_file_path(path),
        None => options,
    }
}

pub async fn cmd_lock_status(config: &Config, args: LockStatusArgs) -> Result<()> {
    let lock = FileLock::new(&args.resource, options_for(config, args.lock_file.as_ref()));
    let info = lock.get_info()?;

    if args.json {
        let json = serde_json::to_string_pretty(&info).map_err(|e| {
            GatewayError::UserError(format!("failed to serialize lock info: {}", e))
        })?;
        println!("{}", json);
    } else {
        print!("{}", render_info(&info, config.lock.stale_timeout_ms));
    }
    Ok(())
}

pub async fn cmd_lock_acquire(config: &Config, args: LockAcquireArgs) -> Result<()> {
    let mut options = options_for(config, args.lock_file.as_ref());
    if let Some(timeout_ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(timeout_ms));
    }
    let mode = if args.shared {
        LockMode::Shared
    } else {
        LockMode::Exclusive
    };

    let mut lock = FileLock::new(&args.resource, options);
    lock.acquire(mode).await?;
    println!("Acquired {} lock: {}", mode, lock.lock_path().display());

    match args.hold_ms {
        Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        None => {
            println!("Holding until Ctrl-C...");
            tokio::signal::ctrl_c().await.map_err(|e| {
                GatewayError::UserError(format!("failed to wait for Ctrl-C: {}", e))
            })?;
        }
    }

    lock.try_release().await?;
    println!("Released: {}", lock.lock_path().display());
    Ok(())
}

pub async fn cmd_lock_force_release(config: &Config, args: LockForceReleaseArgs) -> Result<()> {
    if !args.force {
        return Err(GatewayError::UserError(format!(
            "refusing to force-release without --force flag.\n\n\
             Force-releasing can corrupt data if the lock holder is still active.\n\
             Only do this if you are certain the lock holder has crashed.\n\n\
             To clear the lock, run:\n  prism-gateway lock force-release {} --force",
            args.resource.display()
        )));
    }

    let lock = FileLock::new(&args.resource, options_for(config, args.lock_file.as_ref()));
    let before = lock.get_info().ok();
    if lock.force_release().await? {
        info!(
            path = %lock.lock_path().display(),
            pid = before.as_ref().and_then(|i| i.pid),
            "operator force-released lock"
        );
        println!("Cleared lock: {}", lock.lock_path().display());
    } else {
        println!("No lock present: {}", lock.lock_path().display());
    }
    Ok(())
}

/// Human-readable rendering of `info`.
pub fn render_info(info: &LockInfo, stale_timeout_ms: u64) -> String {
    let mut out = String::new();
    out.push_str(&format!("Lock: {}\n", info.lock_file_path.display()));
    out.push_str(&format!("  Status:     {}\n", info.status));
    if info.status == LockStatus::Unlocked {
        return out;
    }

    match info.mode {
        Some(mode) => out.push_str(&format!("  Mode:       {}\n", mode)),
        None => out.push_str("  Mode:       unknown (record unreadable)\n"),
    }
    if let Some(pid) = info.pid {
        out.push_str(&format!("  PID:        {}\n", pid));
    }
    if let Some(count) = info.shared_count {
        out.push_str(&format!("  Holders:    {}\n", count));
    }
    if let Some(created) = info.created_at {
        out.push_str(&format!(
            "  Created:    {}\n",
            created.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if let Some(updated) = info.updated_at {
        out.push_str(&format!(
            "  Updated:    {}\n",
            updated.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    if info.is_stale() {
        out.push_str(&format!(
            "  Stale:      yes (older than {}ms)\n",
            stale_timeout_ms
        ));
    }
    out
}
