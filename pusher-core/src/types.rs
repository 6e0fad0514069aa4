//! Domain types for the pusher state documents.
//!
//! Every filesystem path that takes part in set membership is a
//! [`CanonicalPath`]; raw `PathBuf`s are resolved before they are stored.

use std::collections::BTreeSet;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{io_err, StateError};

// ---------------------------------------------------------------------------
// CanonicalPath
// ---------------------------------------------------------------------------

/// Fully resolved, absolute form of a filesystem path.
///
/// Serializes as a plain string. Deserializing goes through
/// [`CanonicalPath::resolve`], so hand-edited entries (relative, `..`,
/// symlinked) are keyed the same way the commands would have stored them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CanonicalPath(PathBuf);

impl<'de> Deserialize<'de> for CanonicalPath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = PathBuf::deserialize(deserializer)?;
        CanonicalPath::resolve(&raw).map_err(serde::de::Error::custom)
    }
}

impl CanonicalPath {
    /// Resolve `path` the way the command surface does.
    ///
    /// Existing paths go through `fs::canonicalize` (symlinks, `..`, relative
    /// segments). A path that no longer exists is resolved through its parent
    /// when the parent exists, and lexically normalized otherwise, so a
    /// deleted file still maps onto the key it was queued under.
    pub fn resolve(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        match std::fs::canonicalize(path) {
            Ok(resolved) => return Ok(Self(resolved)),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(path, err)),
        }

        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            let cwd = std::env::current_dir().map_err(|e| io_err(path, e))?;
            cwd.join(path)
        };
        let absolute = normalize_lexically(&absolute);

        if let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) {
            if let Ok(parent) = std::fs::canonicalize(parent) {
                return Ok(Self(parent.join(name)));
            }
        }
        Ok(Self(absolute))
    }

    /// Wrap a path that is already known to be canonical (e.g. one that
    /// came back from `notify` for a canonical watch root).
    pub fn from_canonical(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// `true` when this path names a root-level entry of `root`.
    pub fn is_child_of(&self, root: &CanonicalPath) -> bool {
        self.0.parent() == Some(root.as_path())
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// The persisted `{watch, exclude}` declaration (`watchlist.json`).
///
/// The two sets may overlap; reconciliation treats a path present in both as
/// excluded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchDeclaration {
    #[serde(default)]
    pub watch: BTreeSet<CanonicalPath>,
    #[serde(default)]
    pub exclude: BTreeSet<CanonicalPath>,
}

/// Files whose upload failed and are waiting for `push` (`queue.json`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub to_do: BTreeSet<CanonicalPath>,
}

/// Remote-side settings (`config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Config {
    /// Id of the remote parent container uploads are created under. Empty
    /// until the container is discovered or created.
    #[serde(default)]
    pub folder_id: String,
}

impl Config {
    pub fn has_folder(&self) -> bool {
        !self.folder_id.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_existing_dir_is_absolute() {
        let tmp = TempDir::new().unwrap();
        let resolved = CanonicalPath::resolve(tmp.path()).unwrap();
        assert!(resolved.as_path().is_absolute());
        assert_eq!(resolved.as_path(), tmp.path().canonicalize().unwrap());
    }

    #[test]
    fn resolve_missing_file_keeps_canonical_parent() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("sub").join("..").join("gone.txt");
        let resolved = CanonicalPath::resolve(&missing).unwrap();
        assert_eq!(
            resolved.as_path(),
            tmp.path().canonicalize().unwrap().join("gone.txt")
        );
    }

    #[test]
    fn is_child_of_only_matches_root_level() {
        let root = CanonicalPath::from_canonical(PathBuf::from("/data/in"));
        let child = CanonicalPath::from_canonical(PathBuf::from("/data/in/a.txt"));
        let nested = CanonicalPath::from_canonical(PathBuf::from("/data/in/sub/a.txt"));
        assert!(child.is_child_of(&root));
        assert!(!nested.is_child_of(&root));
    }

    #[test]
    fn declaration_serializes_as_plain_string_arrays() {
        let mut decl = WatchDeclaration::default();
        decl.watch
            .insert(CanonicalPath::from_canonical(PathBuf::from("/tmp/foo")));
        let json = serde_json::to_string(&decl).unwrap();
        assert_eq!(json, r#"{"watch":["/tmp/foo"],"exclude":[]}"#);
    }

    #[test]
    fn hand_edited_entries_are_resolved_on_load() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("inbox");
        std::fs::create_dir(&real).unwrap();
        let link = tmp.path().join("shortcut");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let canonical = real.canonicalize().unwrap();

        let dotted = tmp.path().join("other").join("..").join("inbox");
        let json = serde_json::json!({
            "watch": [dotted, link],
            "exclude": [],
        });
        let decl: WatchDeclaration = serde_json::from_value(json).unwrap();
        assert_eq!(
            decl.watch.into_iter().collect::<Vec<_>>(),
            vec![CanonicalPath::from_canonical(canonical)]
        );
    }

    #[test]
    fn empty_folder_id_is_not_a_folder() {
        assert!(!Config::default().has_folder());
        assert!(Config {
            folder_id: "abc".to_string()
        }
        .has_folder());
    }
}
