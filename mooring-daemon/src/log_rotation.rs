//! Size-based rotation for the daemon's main and error log files.
//!
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.<max_files>`; the oldest
//! generation is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{error_log_path, log_path as daemon_log_path};

/// Size and generation limits for one log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, 5 generations.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// Rotate `log_path` once it reaches `policy.max_bytes`.
///
/// Returns `Ok(false)` when the file is under the limit or missing.
pub fn rotate_if_needed(log_path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.max_files == 0 {
        return Ok(false);
    }

    let oldest = generation_path(log_path, policy.max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..policy.max_files).rev() {
        let from = generation_path(log_path, n);
        if from.exists() {
            fs::rename(&from, generation_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, generation_path(log_path, 1))?;

    // `daemon logs` tails the live path even before the next event.
    fs::File::create(log_path)?;
    Ok(true)
}

/// Rotate both daemon logs under `home`. Returns the files that rotated;
/// failures are logged and skipped.
pub fn rotate_logs(home: &Path, policy: RotationPolicy) -> Vec<PathBuf> {
    let mut rotated = Vec::new();
    for log_path in [daemon_log_path(home), error_log_path(home)] {
        match rotate_if_needed(&log_path, policy) {
            Ok(true) => {
                tracing::info!(path = %log_path.display(), "log file rotated");
                rotated.push(log_path);
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
    rotated
}

/// `daemon.log` → `daemon.log.<n>`
pub fn generation_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "daemon.log".to_string());
    base.with_file_name(format!("{name}.{n}"))
}
