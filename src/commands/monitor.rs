//! Implementation of the `prism-gateway monitor` commands.

use crate::cli::{MonitorRunArgs, MonitorScanArgs};
use prism_gateway::config::Config;
use prism_gateway::error::{GatewayError, Result};
use prism_gateway::locks::LockInfo;
use prism_gateway::monitor::{LockEvent, LockEventType, LockMonitor, MonitorOptions, MonitorStats};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Paths from the command line followed by `monitor.watch`, without duplicates.
fn watch_list(config: &Config, extra: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for path in extra.iter().chain(config.monitor.watch.iter()) {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    if paths.is_empty() {
        return Err(GatewayError::UserError(
            "no lock paths to monitor; pass them as arguments or set monitor.watch in the config"
                .to_string(),
        ));
    }
    Ok(paths)
}

fn build_monitor(options: MonitorOptions, paths: &[PathBuf]) -> LockMonitor {
    let monitor = LockMonitor::new(options);
    for path in paths {
        monitor.monitor_lock(path);
    }
    monitor
}

pub async fn cmd_monitor_scan(config: &Config, args: MonitorScanArgs) -> Result<()> {
    let paths = watch_list(config, &args.locks)?;
    let mut options = config.monitor_options();
    if args.no_cleanup {
        options = options.with_auto_cleanup(false);
    }

    let monitor = build_monitor(options, &paths);
    let problems = monitor.scan().await;
    let stats = monitor.get_stats();
    let events = monitor.get_event_history(None);

    if args.json {
        let report = json!({
            "problems": problems,
            "stats": stats,
            "events": events,
        });
        let text = serde_json::to_string_pretty(&report).map_err(|e| {
            GatewayError::UserError(format!("failed to serialize scan report: {}", e))
        })?;
        println!("{}", text);
    } else {
        print!("{}", render_scan(&problems, &stats, &events));
    }
    Ok(())
}

pub async fn cmd_monitor_run(config: &Config, args: MonitorRunArgs) -> Result<()> {
    let paths = watch_list(config, &args.locks)?;
    let mut options = config.monitor_options();
    if let Some(ms) = args.interval_ms {
        if ms == 0 {
            return Err(GatewayError::UserError(
                "--interval-ms must be greater than 0".to_string(),
            ));
        }
        options = options.with_scan_interval(Duration::from_millis(ms));
    }
    if args.no_cleanup {
        options = options.with_auto_cleanup(false);
    }

    let monitor = Arc::new(build_monitor(options, &paths));
    monitor.start().await;
    println!(
        "Monitoring {} lock(s) every {}ms. Press Ctrl-C to stop.",
        paths.len(),
        monitor.options().scan_interval.as_millis()
    );

    let waited = tokio::signal::ctrl_c().await;
    monitor.stop().await;
    waited.map_err(|e| GatewayError::UserError(format!("failed to wait for Ctrl-C: {}", e)))?;

    let stats = monitor.get_stats();
    println!(
        "Stopped after {} scan(s): {} stale found, {} cleaned.",
        stats.scan_count, stats.stale_locks_found, stats.locks_cleaned
    );
    Ok(())
}

/// Text report of one scan.
pub fn render_scan(problems: &[LockInfo], stats: &MonitorStats, events: &[LockEvent]) -> String {
    let mut out = String::new();
    if problems.is_empty() {
        out.push_str(&format!(
            "No stale locks ({} lock(s) held).\n",
            stats.last_scan_lock_count
        ));
        return out;
    }

    out.push_str(&format!("Stale locks ({}):\n\n", problems.len()));
    for info in problems {
        out.push_str(&format!("  {}\n", info));
        let outcome = events
            .iter()
            .filter(|e| e.lock_path == info.lock_file_path)
            .map(|e| e.event_type)
            .find(|t| {
                matches!(
                    t,
                    LockEventType::Cleaned
                        | LockEventType::CleanupFailed
                        | LockEventType::OrphanDetected
                )
            });
        let note = match outcome {
            Some(LockEventType::Cleaned) => "orphaned, cleaned",
            Some(LockEventType::CleanupFailed) => "orphaned, cleanup FAILED",
            Some(_) => "orphaned, not cleaned",
            None if info.holder_pids.is_empty() => "unreadable record, left in place",
            None => "holder alive, left in place",
        };
        out.push_str(&format!("    -> {}\n", note));
    }
    out.push_str(&format!(
        "\n{} stale, {} cleaned.\n",
        stats.stale_locks_found, stats.locks_cleaned
    ));
    out
}
