//! Locations of the shared state documents.
//!
//! ```text
//! ~/.config/pusher/
//!   watchlist.json    {"watch": [...], "exclude": [...]}
//!   queue.json        {"to_do": [...]}
//!   config.json       {"folder_id": "..."}
//!   auth_creds.json   (mode 0600)
//!   state.lock        advisory lock for read-modify-write
//! ```
//!
//! Every helper takes an explicit `home` so tests can point it at a
//! `TempDir`; [`home`] resolves the real one.

use std::path::{Path, PathBuf};

use crate::error::StateError;

pub const WATCHLIST_FILE: &str = "watchlist.json";
pub const QUEUE_FILE: &str = "queue.json";
pub const CONFIG_FILE: &str = "config.json";
pub const CREDENTIALS_FILE: &str = "auth_creds.json";
pub const LOCK_FILE: &str = "state.lock";

/// `<home>/.config/pusher`
pub fn state_root_at(home: &Path) -> PathBuf {
    home.join(".config").join("pusher")
}

pub fn watchlist_path_at(home: &Path) -> PathBuf {
    state_root_at(home).join(WATCHLIST_FILE)
}

pub fn queue_path_at(home: &Path) -> PathBuf {
    state_root_at(home).join(QUEUE_FILE)
}

pub fn config_path_at(home: &Path) -> PathBuf {
    state_root_at(home).join(CONFIG_FILE)
}

pub fn credentials_path_at(home: &Path) -> PathBuf {
    state_root_at(home).join(CREDENTIALS_FILE)
}

pub fn lock_path_at(home: &Path) -> PathBuf {
    state_root_at(home).join(LOCK_FILE)
}

/// The current user's home directory.
pub fn home() -> Result<PathBuf, StateError> {
    dirs::home_dir().ok_or(StateError::HomeNotFound)
}
