//! Watch declaration commands and reconciliation.
//!
//! `watch` / `exclude` / `remove` only rewrite `watchlist.json`; the daemon
//! picks up the change from the filesystem notification and runs
//! [`reconcile`] against its live subscriptions.
//!
//! `remove` forgets a path in both lists but never cancels a live
//! subscription: only an `exclude` entry produces a removal. A removed
//! directory therefore keeps being watched until the daemon restarts or the
//! path is explicitly excluded.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::StateError;
use crate::store;
use crate::types::{CanonicalPath, WatchDeclaration};

/// Delta between a declaration and the live subscription set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_add: BTreeSet<CanonicalPath>,
    pub to_remove: BTreeSet<CanonicalPath>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute what to subscribe and unsubscribe.
///
/// - `to_add = watch − exclude − active`, keeping only paths that resolve to
///   an existing directory right now. Missing directories are skipped without
///   a retry; they are picked up by a later pass once they exist.
/// - `to_remove = active ∩ exclude`.
pub fn reconcile<'a, I>(declaration: &WatchDeclaration, active: I) -> Reconciliation
where
    I: IntoIterator<Item = &'a CanonicalPath>,
{
    let active: BTreeSet<&CanonicalPath> = active.into_iter().collect();

    let to_add = declaration
        .watch
        .iter()
        .filter(|path| !declaration.exclude.contains(*path))
        .filter(|path| !active.contains(path))
        .filter(|path| path.as_path().is_dir())
        .cloned()
        .collect();

    let to_remove = active
        .into_iter()
        .filter(|path| declaration.exclude.contains(*path))
        .cloned()
        .collect();

    Reconciliation { to_add, to_remove }
}

// ---------------------------------------------------------------------------
// Command-level mutations
// ---------------------------------------------------------------------------

/// Move each path into `watch` (dropping it from `exclude`).
///
/// Returns the canonical forms that were recorded.
pub fn watch_at<P: AsRef<Path>>(home: &Path, paths: &[P]) -> Result<Vec<CanonicalPath>, StateError> {
    let resolved = resolve_all(paths)?;
    store::update_at::<WatchDeclaration, _>(home, |decl| {
        for path in &resolved {
            decl.exclude.remove(path);
            decl.watch.insert(path.clone());
            tracing::info!(path = %path, "watching");
        }
    })?;
    Ok(resolved)
}

/// Move each path into `exclude` (dropping it from `watch`).
pub fn exclude_at<P: AsRef<Path>>(
    home: &Path,
    paths: &[P],
) -> Result<Vec<CanonicalPath>, StateError> {
    let resolved = resolve_all(paths)?;
    store::update_at::<WatchDeclaration, _>(home, |decl| {
        for path in &resolved {
            decl.watch.remove(path);
            decl.exclude.insert(path.clone());
            tracing::info!(path = %path, "excluding");
        }
    })?;
    Ok(resolved)
}

/// Strip each path from both lists. Does not stop an active watch.
pub fn remove_at<P: AsRef<Path>>(home: &Path, paths: &[P]) -> Result<Vec<CanonicalPath>, StateError> {
    let resolved = resolve_all(paths)?;
    store::update_at::<WatchDeclaration, _>(home, |decl| {
        for path in &resolved {
            decl.watch.remove(path);
            decl.exclude.remove(path);
            tracing::info!(path = %path, "removed from watchlist");
        }
    })?;
    Ok(resolved)
}

/// Current declaration, creating the skeleton if needed.
pub fn load_at(home: &Path) -> Result<WatchDeclaration, StateError> {
    store::load_at(home)
}

fn resolve_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<CanonicalPath>, StateError> {
    paths.iter().map(CanonicalPath::resolve).collect()
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn canon(path: &Path) -> CanonicalPath {
        CanonicalPath::resolve(path).unwrap()
    }

    #[test]
    fn reconcile_adds_existing_unwatched_dirs() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        fs::create_dir(&a).unwrap();

        let mut decl = WatchDeclaration::default();
        decl.watch.insert(canon(&a));

        let delta = reconcile(&decl, std::iter::empty());
        assert_eq!(delta.to_add, BTreeSet::from([canon(&a)]));
        assert!(delta.to_remove.is_empty());
    }

    #[test]
    fn reconcile_skips_missing_dirs_and_regular_files() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("note.txt");
        fs::write(&file, "x").unwrap();

        let mut decl = WatchDeclaration::default();
        decl.watch.insert(canon(&tmp.path().join("missing")));
        decl.watch.insert(canon(&file));

        assert!(reconcile(&decl, std::iter::empty()).is_empty());
    }

    #[test]
    fn reconcile_ignores_already_active() {
        let tmp = TempDir::new().unwrap();
        let a = canon(tmp.path());
        let mut decl = WatchDeclaration::default();
        decl.watch.insert(a.clone());

        assert!(reconcile(&decl, [&a]).is_empty());
    }

    #[test]
    fn path_in_both_lists_is_treated_as_excluded() {
        let tmp = TempDir::new().unwrap();
        let a = canon(tmp.path());
        let mut decl = WatchDeclaration::default();
        decl.watch.insert(a.clone());
        decl.exclude.insert(a.clone());

        assert!(reconcile(&decl, std::iter::empty()).to_add.is_empty());
        assert_eq!(reconcile(&decl, [&a]).to_remove, BTreeSet::from([a]));
    }

    #[test]
    fn active_path_dropped_from_watch_is_not_removed() {
        let tmp = TempDir::new().unwrap();
        let a = canon(tmp.path());
        let decl = WatchDeclaration::default();

        let delta = reconcile(&decl, [&a]);
        assert!(delta.to_remove.is_empty(), "only exclude removes a live watch");
    }
}
