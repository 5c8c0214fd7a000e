//! Audit log of lock monitor events.
//!
//! When a monitor is configured with an audit log path, every event it
//! records is also appended to that file as NDJSON (one JSON object per line):
//!
//! ```text
//! {"timestamp":"2026-01-05T10:00:00Z","type":"orphan_detected","lock_path":"/data/tasks.jsonl.lock","details":{"pids":[4242]}}
//! ```
//!
//! Lines are written with a single `write` on a file opened in append mode,
//! so concurrent monitors in different processes interleave whole lines.
//! The in-memory history remains the primary record; the audit log is best
//! effort.

use crate::error::{GatewayError, Result};
use crate::monitor::LockEvent;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Serialize an event to a single NDJSON line (without the newline).
pub fn to_ndjson_line(event: &LockEvent) -> Result<String> {
    serde_json::to_string(event)
        .map_err(|e| GatewayError::StoreError(format!("failed to serialize event: {}", e)))
}

/// Append `event` to the audit log at `path`, creating the file and its
/// parent directory when missing.
pub fn append_event(path: &Path, event: &LockEvent) -> Result<()> {
    let mut line = to_ndjson_line(event)?;
    line.push('\n');

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            GatewayError::StoreError(format!(
                "failed to create audit log directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            GatewayError::StoreError(format!(
                "failed to open audit log '{}': {}",
                path.display(),
                e
            ))
        })?;

    file.write_all(line.as_bytes()).map_err(|e| {
        GatewayError::StoreError(format!(
            "failed to write audit log '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Read every event in the audit log, oldest first. A missing file reads as
/// empty; malformed lines are skipped with a warning.
pub fn read_events(path: &Path) -> Result<Vec<LockEvent>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(GatewayError::StoreError(format!(
                "failed to read audit log '{}': {}",
                path.display(),
                e
            )));
        }
    };

    let mut events = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LockEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping malformed audit log line"
            ),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::LockEventType;
    use serde_json::json;
    use tempfile::TempDir;

    fn cleaned(path: &str) -> LockEvent {
        LockEvent::new(LockEventType::Cleaned, Path::new(path)).with_details(json!({"pids": [7]}))
    }

    #[test]
    fn test_ndjson_line_is_single_line() {
        let line = to_ndjson_line(&cleaned("/d/a.lock")).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\"type\":\"cleaned\""));
    }

    #[test]
    fn test_append_creates_file_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("audit").join("locks.ndjson");

        append_event(&log, &cleaned("/d/a.lock")).unwrap();

        let content = fs::read_to_string(&log).unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_append_keeps_order() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("locks.ndjson");

        append_event(&log, &cleaned("/d/a.lock")).unwrap();
        append_event(
            &log,
            &LockEvent::new(LockEventType::ScanCompleted, Path::new("")),
        )
        .unwrap();

        let events = read_events(&log).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, LockEventType::Cleaned);
        assert_eq!(events[0].details["pids"][0], 7);
        assert_eq!(events[1].event_type, LockEventType::ScanCompleted);
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let log = temp_dir.path().join("locks.ndjson");
        let good = to_ndjson_line(&cleaned("/d/a.lock")).unwrap();
        fs::write(&log, format!("not json\n\n{}\n{{\"half\":", good)).unwrap();

        let events = read_events(&log).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lock_path, Path::new("/d/a.lock"));
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        assert!(read_events(&temp_dir.path().join("none.ndjson")).unwrap().is_empty());
    }
}
