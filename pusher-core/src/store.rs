//! JSON state store shared by the CLI and the daemon.
//!
//! # Write protocol
//!
//! serialize → unique `.tmp` sibling → `chmod 0600` → `rename` over the
//! target. Readers therefore only ever see a complete document, and the
//! daemon (which watches the state directory) sees exactly one rename per
//! save.
//!
//! # API pattern
//!
//! - [`load_at`] never reports a missing or empty file: it writes the
//!   document's skeleton and re-reads it.
//! - [`update_at`] is the read-modify-write used by every command; it holds
//!   the advisory lock on `state.lock` for the whole cycle so two commands
//!   cannot interleave. Nothing is merged: the last full write wins.
//! - [`DocumentCache`] is the daemon's in-memory copy. A malformed document
//!   is logged and the previous value is kept.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, StateError};
use crate::paths::{self, lock_path_at, state_root_at};
use crate::types::{Config, QueueState, WatchDeclaration};

// ---------------------------------------------------------------------------
// 1. Document kinds
// ---------------------------------------------------------------------------

/// A persisted JSON document with a kind-specific empty skeleton
/// (its `Default`).
pub trait Document: Serialize + DeserializeOwned + Default + Clone + PartialEq {
    /// File name under the state root.
    const FILE_NAME: &'static str;
    /// Short label used in log lines.
    const KIND: &'static str;
}

impl Document for WatchDeclaration {
    const FILE_NAME: &'static str = paths::WATCHLIST_FILE;
    const KIND: &'static str = "watchlist";
}

impl Document for QueueState {
    const FILE_NAME: &'static str = paths::QUEUE_FILE;
    const KIND: &'static str = "queue";
}

impl Document for Config {
    const FILE_NAME: &'static str = paths::CONFIG_FILE;
    const KIND: &'static str = "config";
}

/// `<home>/.config/pusher/<D::FILE_NAME>` — pure, no I/O.
pub fn document_path_at<D: Document>(home: &Path) -> PathBuf {
    state_root_at(home).join(D::FILE_NAME)
}

// ---------------------------------------------------------------------------
// 2. Load / save
// ---------------------------------------------------------------------------

/// Load document `D`, creating it from its skeleton when the file is absent
/// or empty.
///
/// Returns [`StateError::Parse`] (with the file path) if the content is not
/// a valid document.
pub fn load_at<D: Document>(home: &Path) -> Result<D, StateError> {
    let path = document_path_at::<D>(home);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(io_err(&path, err)),
    };

    if contents.trim().is_empty() {
        tracing::debug!(kind = D::KIND, path = %path.display(), "initialising empty document");
        save_at(home, &D::default())?;
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        return parse(&path, &contents);
    }

    parse(&path, &contents)
}

fn parse<D: Document>(path: &Path, contents: &str) -> Result<D, StateError> {
    serde_json::from_str(contents).map_err(|source| StateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Atomically replace document `D` with `doc`.
pub fn save_at<D: Document>(home: &Path, doc: &D) -> Result<(), StateError> {
    ensure_state_root_at(home)?;
    let path = document_path_at::<D>(home);
    let tmp = unique_tmp_path(&path);

    let json = serde_json::to_string_pretty(doc)?;
    fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(err) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&path, err));
    }
    Ok(())
}

/// Locked read-modify-write of document `D`.
///
/// `mutate` runs while the advisory lock is held; its return value is passed
/// through. The document is saved even when `mutate` leaves it unchanged so
/// watchers observe the command.
pub fn update_at<D, T>(home: &Path, mutate: impl FnOnce(&mut D) -> T) -> Result<T, StateError>
where
    D: Document,
{
    let _lock = StateLock::acquire(home)?;
    let mut doc = load_at::<D>(home)?;
    let out = mutate(&mut doc);
    save_at(home, &doc)?;
    Ok(out)
}

/// Create all three documents if missing.
pub fn ensure_all_at(home: &Path) -> Result<(), StateError> {
    load_at::<WatchDeclaration>(home)?;
    load_at::<QueueState>(home)?;
    load_at::<Config>(home)?;
    Ok(())
}

/// Create `<home>/.config/pusher` (mode `0700`) if it does not yet exist.
pub fn ensure_state_root_at(home: &Path) -> Result<PathBuf, StateError> {
    let dir = state_root_at(home);
    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

fn unique_tmp_path(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

// ---------------------------------------------------------------------------
// 3. Advisory lock
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on `state.lock`, released on drop.
///
/// `flock` locks belong to the open file description, so two handles in the
/// same process exclude each other just like two processes do.
#[derive(Debug)]
pub struct StateLock {
    _lock: Flock<File>,
}

impl StateLock {
    /// Block until the lock is granted.
    pub fn acquire(home: &Path) -> Result<Self, StateError> {
        ensure_state_root_at(home)?;
        let path = lock_path_at(home);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        loop {
            match Flock::lock(file, FlockArg::LockExclusive) {
                Ok(lock) => return Ok(Self { _lock: lock }),
                Err((returned, Errno::EINTR)) => file = returned,
                Err((_, errno)) => {
                    return Err(StateError::Lock {
                        path,
                        source: errno.into(),
                    })
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 4. In-memory cache
// ---------------------------------------------------------------------------

/// Last successfully loaded value of document `D`.
#[derive(Debug, Clone)]
pub struct DocumentCache<D: Document> {
    home: PathBuf,
    value: D,
}

impl<D: Document> DocumentCache<D> {
    /// Load the current document; a malformed file starts the cache from the
    /// skeleton instead of failing.
    pub fn load(home: &Path) -> Self {
        let mut cache = Self {
            home: home.to_path_buf(),
            value: D::default(),
        };
        cache.reload();
        cache
    }

    pub fn get(&self) -> &D {
        &self.value
    }

    /// Re-read the backing file. Returns `true` when the in-memory value
    /// changed. On any load failure the previous value is retained.
    pub fn reload(&mut self) -> bool {
        match load_at::<D>(&self.home) {
            Ok(fresh) => {
                let changed = fresh != self.value;
                self.value = fresh;
                changed
            }
            Err(err) => {
                tracing::error!(
                    kind = D::KIND,
                    error = %err,
                    "failed to reload state document; keeping previous value",
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanonicalPath;
    use tempfile::TempDir;

    #[test]
    fn load_creates_skeleton_when_missing() {
        let home = TempDir::new().unwrap();
        let queue: QueueState = load_at(home.path()).unwrap();
        assert!(queue.to_do.is_empty());

        let raw = fs::read_to_string(document_path_at::<QueueState>(home.path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value, serde_json::json!({"to_do": []}));
    }

    #[test]
    fn load_reinitialises_empty_file() {
        let home = TempDir::new().unwrap();
        ensure_state_root_at(home.path()).unwrap();
        fs::write(document_path_at::<Config>(home.path()), "").unwrap();

        let config: Config = load_at(home.path()).unwrap();
        assert_eq!(config.folder_id, "");
        let raw = fs::read_to_string(document_path_at::<Config>(home.path())).unwrap();
        assert!(raw.contains("folder_id"));
    }

    #[test]
    fn load_malformed_reports_parse_error_with_path() {
        let home = TempDir::new().unwrap();
        ensure_state_root_at(home.path()).unwrap();
        fs::write(document_path_at::<WatchDeclaration>(home.path()), "{not json").unwrap();

        let err = load_at::<WatchDeclaration>(home.path()).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }), "got: {err}");
        assert!(err.to_string().contains("watchlist.json"));
    }

    #[test]
    fn save_leaves_no_tmp_files() {
        let home = TempDir::new().unwrap();
        save_at(home.path(), &Config::default()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(state_root_at(home.path()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp files left behind: {leftovers:?}");
    }

    #[test]
    fn update_returns_closure_value_and_persists() {
        let home = TempDir::new().unwrap();
        let inserted = update_at::<QueueState, _>(home.path(), |q| {
            q.to_do
                .insert(CanonicalPath::from_canonical(PathBuf::from("/tmp/a.txt")))
        })
        .unwrap();
        assert!(inserted);
        let queue: QueueState = load_at(home.path()).unwrap();
        assert_eq!(queue.to_do.len(), 1);
    }

    #[test]
    fn second_lock_waits_until_first_is_dropped() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::time::Duration;

        let home = TempDir::new().unwrap();
        let first = StateLock::acquire(home.path()).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let waiter = {
            let home = home.path().to_path_buf();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _second = StateLock::acquire(&home).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(200));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn cache_keeps_previous_value_on_malformed_reload() {
        let home = TempDir::new().unwrap();
        save_at(
            home.path(),
            &Config {
                folder_id: "folder-1".to_string(),
            },
        )
        .unwrap();
        let mut cache = DocumentCache::<Config>::load(home.path());
        assert_eq!(cache.get().folder_id, "folder-1");

        fs::write(document_path_at::<Config>(home.path()), "{{{").unwrap();
        assert!(!cache.reload());
        assert_eq!(cache.get().folder_id, "folder-1");
    }

    #[test]
    fn cache_reports_change() {
        let home = TempDir::new().unwrap();
        let mut cache = DocumentCache::<Config>::load(home.path());
        assert!(!cache.reload());
        save_at(
            home.path(),
            &Config {
                folder_id: "x".to_string(),
            },
        )
        .unwrap();
        assert!(cache.reload());
        assert_eq!(cache.get().folder_id, "x");
    }

    #[cfg(unix)]
    #[test]
    fn state_root_and_documents_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().unwrap();
        ensure_all_at(home.path()).unwrap();
        let dir_mode = fs::metadata(state_root_at(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
        let file_mode = fs::metadata(document_path_at::<QueueState>(home.path()))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
    }
}
