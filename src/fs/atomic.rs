//! Atomic file replacement.
//!
//! Lock records and store files are rewritten by writing a sibling temporary
//! file, syncing it, and renaming it over the target. Readers therefore see
//! either the previous content or the new content, never a torn write.
//!
//! Temporary files are named `.{filename}.{pid}.{seq}.tmp` so concurrent
//! writers in different processes never share one, and so a process can find
//! and remove its own leftovers after a crash of the writing task.

use crate::error::{LockError, LockResult};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically write bytes to a file, creating parent directories as needed.
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> LockResult<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| LockError::io(parent, e))?;
    }

    let temp_path = temp_path_for(path)?;
    write_and_sync(&temp_path, content)?;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(LockError::io(path, e));
    }

    sync_parent_dir(path);
    Ok(())
}

/// Persist the directory entry after a rename; failure here is not fatal.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Atomically write a string to a file.
pub fn atomic_write_file<P: AsRef<Path>>(path: P, content: &str) -> LockResult<()> {
    atomic_write(path, content.as_bytes())
}

/// Prefix shared by every temporary file this process creates for `target`.
pub fn temp_prefix_for(target: &Path) -> Option<String> {
    let filename = target.file_name()?.to_str()?;
    Some(format!(".{}.{}.", filename, std::process::id()))
}

/// Remove temporary files this process left next to `target`.
///
/// Returns the number of files removed.
pub fn remove_own_temp_files(target: &Path) -> LockResult<usize> {
    let Some(prefix) = temp_prefix_for(target) else {
        return Ok(0);
    };
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(LockError::io(parent, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| LockError::io(parent, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".tmp") {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LockError::io(entry.path(), e)),
            }
        }
    }
    Ok(removed)
}

fn temp_path_for(target: &Path) -> LockResult<PathBuf> {
    let prefix = temp_prefix_for(target).ok_or_else(|| LockError::Record {
        path: target.to_path_buf(),
        message: "path has no usable file name".to_string(),
    })?;
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let parent = target.parent().unwrap_or(Path::new("."));
    Ok(parent.join(format!("{}{}.tmp", prefix, seq)))
}

fn write_and_sync(path: &Path, content: &[u8]) -> LockResult<()> {
    let result = File::create(path).and_then(|mut file| {
        file.write_all(content)?;
        file.sync_all()
    });
    result.map_err(|e| {
        let _ = fs::remove_file(path);
        LockError::io(path, e)
    })
}
