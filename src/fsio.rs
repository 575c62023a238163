//! Atomic file-write helpers for state files.
//!
//! Progress files, cookie files, topic manifests and the run summary are all
//! written with write-to-temp-plus-rename so a crash mid-write leaves either
//! the prior complete file or the new complete file on disk, never a
//! truncated one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes `bytes` to `path` atomically.
///
/// The bytes are first written and flushed to a sibling temp file
/// (`<name>.tmp`), then renamed over the target. The parent directory is
/// created if missing.
///
/// # Errors
///
/// Returns the underlying I/O error from directory creation, temp-file
/// write, or the final rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path(path);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        // Rename-over-target is only atomic for data already on disk.
        file.sync_all()?;
    }

    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Don't leave the temp file behind on failure.
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Serializes `value` as pretty JSON and writes it atomically to `path`.
///
/// # Errors
///
/// Returns an I/O error wrapping serialization failure or the write itself.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    write_atomic(path, &bytes)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| "state".to_string(), |n| n.to_string_lossy().into_owned());
    name.push_str(".tmp");
    path.with_file_name(name)
}
