//! Durable retry queue (`queue.json`).
//!
//! The queue is a set of canonical file paths whose upload failed or that
//! `collect` found already sitting in a watched directory. Draining it needs
//! an uploader and lives in `pusher-upload`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{io_err, StateError};
use crate::store;
use crate::types::{CanonicalPath, QueueState, WatchDeclaration};

/// Add `path` to the queue. Returns `false` if it was already queued.
pub fn schedule_at(home: &Path, path: impl AsRef<Path>) -> Result<bool, StateError> {
    let path = CanonicalPath::resolve(path)?;
    let inserted = store::update_at::<QueueState, _>(home, |q| q.to_do.insert(path.clone()))?;
    if inserted {
        tracing::info!(path = %path, "scheduled");
    }
    Ok(inserted)
}

/// Remove `path` from the queue. Returns `false` if it was not queued.
///
/// An absent path leaves the document untouched.
pub fn unschedule_at(home: &Path, path: impl AsRef<Path>) -> Result<bool, StateError> {
    let path = CanonicalPath::resolve(path)?;
    let _lock = store::StateLock::acquire(home)?;
    let mut queue: QueueState = store::load_at(home)?;
    if !queue.to_do.remove(&path) {
        return Ok(false);
    }
    store::save_at(home, &queue)?;
    tracing::info!(path = %path, "unscheduled");
    Ok(true)
}

/// Current queue members.
pub fn load_at(home: &Path) -> Result<QueueState, StateError> {
    store::load_at(home)
}

// ---------------------------------------------------------------------------
// Directory scans
// ---------------------------------------------------------------------------

/// Root-level regular files of every watched directory that exists,
/// keyed by directory. Subdirectories are not descended into.
pub fn watched_files_at(
    home: &Path,
) -> Result<BTreeMap<CanonicalPath, Vec<CanonicalPath>>, StateError> {
    let declaration: WatchDeclaration = store::load_at(home)?;
    let mut out = BTreeMap::new();
    for dir in &declaration.watch {
        if !dir.as_path().is_dir() {
            continue;
        }
        out.insert(dir.clone(), root_files(dir)?);
    }
    Ok(out)
}

fn root_files(dir: &CanonicalPath) -> Result<Vec<CanonicalPath>, StateError> {
    let entries = fs::read_dir(dir).map_err(|e| io_err(dir.as_path(), e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir.as_path(), e))?;
        let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
        if ty.is_file() {
            files.push(CanonicalPath::resolve(entry.path())?);
        }
    }
    files.sort();
    Ok(files)
}

/// Outcome of [`collect_at`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectReport {
    /// Root-level files found across all watched directories.
    pub found: usize,
    /// Files that were not queued before and now are.
    pub scheduled: Vec<CanonicalPath>,
}

/// Queue every root-level file of the watched directories that is not
/// already queued.
///
/// The event feed only reports changes made after a watch starts, so files
/// that were already present would otherwise never be uploaded.
pub fn collect_at(home: &Path) -> Result<CollectReport, StateError> {
    let files = watched_files_at(home)?;
    let found = files.values().map(Vec::len).sum();

    let scheduled = store::update_at::<QueueState, _>(home, |queue| {
        files
            .into_values()
            .flatten()
            .filter(|file| queue.to_do.insert(file.clone()))
            .collect::<Vec<_>>()
    })?;

    for path in &scheduled {
        tracing::info!(path = %path, "scheduled");
    }
    tracing::info!(found, scheduled = scheduled.len(), "collected files for upload");
    Ok(CollectReport { found, scheduled })
}

/// One watched directory in a [`status_at`] report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryStatus {
    pub dir: CanonicalPath,
    pub queued: Vec<CanonicalPath>,
    pub unqueued: Vec<CanonicalPath>,
}

/// Which root-level files of each watched directory are queued.
pub fn status_at(home: &Path) -> Result<Vec<DirectoryStatus>, StateError> {
    let queue: QueueState = store::load_at(home)?;
    let files = watched_files_at(home)?;
    Ok(files
        .into_iter()
        .map(|(dir, files)| {
            let (queued, unqueued) = files.into_iter().partition(|f| queue.to_do.contains(f));
            DirectoryStatus {
                dir,
                queued,
                unqueued,
            }
        })
        .collect())
}
