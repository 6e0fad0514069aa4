//! Runtime tunables read from the environment.
//!
//! | variable                      | default                         |
//! |-------------------------------|---------------------------------|
//! | `PUSHER_WORKERS`              | 4 concurrent uploads            |
//! | `PUSHER_UPLOAD_TIMEOUT_SECS`  | 120                             |
//! | `PUSHER_DRIVE_API`            | `https://www.googleapis.com`    |

use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DRIVE_API: &str = "https://www.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Upper bound on uploads running at the same time in the daemon.
    pub workers: usize,
    /// Per-request timeout applied to every remote call.
    pub upload_timeout: Duration,
    /// Base URL of the Drive REST API.
    pub drive_api: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            drive_api: DEFAULT_DRIVE_API.to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable source. Unparseable or
    /// zero values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let workers = lookup("PUSHER_WORKERS")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.workers);

        let upload_timeout = lookup("PUSHER_UPLOAD_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.upload_timeout);

        let drive_api = lookup("PUSHER_DRIVE_API")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.drive_api);

        Self {
            workers,
            upload_timeout,
            drive_api,
        }
    }
}
