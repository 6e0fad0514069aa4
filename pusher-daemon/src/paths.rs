use std::path::{Path, PathBuf};
use std::time::Duration;

use pusher_core::paths::state_root_at;

/// Quiet period a lane waits for before acting on a burst of events.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
/// A lane with no events for this long exits; the next event respawns it.
pub const LANE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    state_root_at(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    state_root_at(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}
