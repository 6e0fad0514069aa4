//! Size-based rotation of the daemon's redirected output.
//!
//! `pusher start` points the daemon's stdout/stderr at `logs/daemon.log` and
//! `logs/daemon-err.log`. Once a file passes the size limit it is shifted to
//! `<name>.1` (older copies move up one slot, the last one is dropped).
//!
//! The live file is copied and then truncated in place, never renamed: the
//! daemon keeps writing through the append-mode descriptors it inherited,
//! and those must keep pointing at `daemon.log`.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
pub const MAX_ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub keep: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_LOG_BYTES,
            keep: MAX_ROTATED_FILES,
        }
    }
}

/// Rotate `log_path` if it has reached `policy.max_bytes`.
///
/// Returns `Ok(false)` when the file is smaller or does not exist.
pub fn rotate_if_needed(log_path: &Path, policy: RotationPolicy) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < policy.max_bytes || policy.keep == 0 {
        return Ok(false);
    }

    let oldest = backup_path(log_path, policy.keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..policy.keep).rev() {
        let src = backup_path(log_path, n);
        if src.exists() {
            fs::rename(&src, backup_path(log_path, n + 1))?;
        }
    }
    fs::copy(log_path, backup_path(log_path, 1))?;
    OpenOptions::new().write(true).open(log_path)?.set_len(0)?;
    Ok(true)
}

/// Rotate both daemon logs under `home`. Failures are logged per file.
pub fn rotate_logs(home: &Path) {
    let policy = RotationPolicy::default();
    for log_path in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match rotate_if_needed(&log_path, policy) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// `daemon.log` → `daemon.log.<n>`.
pub fn backup_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| crate::paths::DAEMON_STDOUT_LOG.to_string());
    base.with_file_name(format!("{name}.{n}"))
}
