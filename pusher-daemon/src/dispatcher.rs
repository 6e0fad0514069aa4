//! Live subscriptions and event routing.
//!
//! The [`Dispatcher`] owns every directory subscription and the in-memory
//! copies of the state documents. It receives raw `notify` events in order
//! and turns them into:
//!
//! - reloads of `watchlist.json` / `queue.json` / `config.json` (the state
//!   root is watched but never counted as a subscription); a changed
//!   watchlist triggers a reconciliation pass;
//! - [`DirectoryEvent`]s for root-level entries of subscribed directories,
//!   which the caller hands to the worker pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;

use pusher_core::paths::{self as state_paths, state_root_at};
use pusher_core::store::ensure_state_root_at;
use pusher_core::watchlist::{self, Reconciliation};
use pusher_core::{CanonicalPath, Config, DocumentCache, QueueState, WatchDeclaration};
use pusher_upload::DirectoryEvent;

use crate::error::{io_err, DaemonError};

/// Subscribe / unsubscribe a single directory, non-recursively.
pub trait DirectoryWatcher {
    fn watch_dir(&mut self, dir: &Path) -> Result<(), DaemonError>;
    fn unwatch_dir(&mut self, dir: &Path) -> Result<(), DaemonError>;
}

impl DirectoryWatcher for RecommendedWatcher {
    fn watch_dir(&mut self, dir: &Path) -> Result<(), DaemonError> {
        self.watch(dir, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch_dir(&mut self, dir: &Path) -> Result<(), DaemonError> {
        self.unwatch(dir)?;
        Ok(())
    }
}

/// One active directory subscription.
#[derive(Debug, Clone, Serialize)]
pub struct LiveSubscription {
    pub since: DateTime<Utc>,
}

/// Snapshot published to the control socket.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatcherStatus {
    pub subscriptions: Vec<String>,
    pub queued: usize,
    pub folder_configured: bool,
}

pub struct Dispatcher<W: DirectoryWatcher> {
    watcher: W,
    state_root: PathBuf,
    subscriptions: HashMap<CanonicalPath, LiveSubscription>,
    declaration: DocumentCache<WatchDeclaration>,
    queue: DocumentCache<QueueState>,
    config: DocumentCache<Config>,
}

impl<W: DirectoryWatcher> Dispatcher<W> {
    /// Watch the state root, load the documents and run the first
    /// reconciliation pass.
    pub fn new(home: &Path, mut watcher: W) -> Result<Self, DaemonError> {
        ensure_state_root_at(home)?;
        let root = state_root_at(home);
        let state_root = fs::canonicalize(&root).map_err(|e| io_err(&root, e))?;
        watcher.watch_dir(&state_root)?;

        let mut dispatcher = Self {
            watcher,
            state_root,
            subscriptions: HashMap::new(),
            declaration: DocumentCache::load(home),
            queue: DocumentCache::load(home),
            config: DocumentCache::load(home),
        };
        dispatcher.reconcile();
        Ok(dispatcher)
    }

    pub fn is_subscribed(&self, dir: &CanonicalPath) -> bool {
        self.subscriptions.contains_key(dir)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &CanonicalPath> {
        self.subscriptions.keys()
    }

    pub fn status(&self) -> DispatcherStatus {
        let mut subscriptions: Vec<String> =
            self.subscriptions.keys().map(ToString::to_string).collect();
        subscriptions.sort();
        DispatcherStatus {
            subscriptions,
            queued: self.queue.get().to_do.len(),
            folder_configured: self.config.get().has_folder(),
        }
    }

    /// Bring the live subscriptions in line with the cached declaration.
    ///
    /// Runs at startup and whenever `watchlist.json` changes. A directory
    /// that cannot be watched, or does not exist yet, is skipped until the
    /// next such change.
    pub fn reconcile(&mut self) -> Reconciliation {
        let plan = watchlist::reconcile(self.declaration.get(), self.subscriptions.keys());

        for dir in &plan.to_remove {
            if let Err(err) = self.watcher.unwatch_dir(dir.as_path()) {
                tracing::debug!(path = %dir, error = %err, "unwatch failed; dropping subscription anyway");
            }
            self.subscriptions.remove(dir);
            tracing::info!(path = %dir, "stopped watching");
        }

        for dir in &plan.to_add {
            match self.watcher.watch_dir(dir.as_path()) {
                Ok(()) => {
                    self.subscriptions
                        .insert(dir.clone(), LiveSubscription { since: Utc::now() });
                    tracing::info!(path = %dir, "watching");
                }
                Err(err) => tracing::warn!(path = %dir, error = %err, "could not watch directory"),
            }
        }

        plan
    }

    /// Route one raw notify event.
    pub fn handle(&mut self, event: &Event) -> Vec<DirectoryEvent> {
        let mut state_changed = false;
        for path in &event.paths {
            if path.parent() == Some(self.state_root.as_path()) {
                state_changed |= self.reload_document(path);
            }
            if self.lost_subscription(path, &event.kind) {
                self.subscriptions.remove(&CanonicalPath::from_canonical(path.clone()));
                tracing::warn!(path = %path.display(), "watched directory disappeared");
            }
        }
        if state_changed {
            self.reconcile();
        }
        self.classify(event)
    }

    /// Reload the document at `path` if it is one. Returns `true` for any
    /// write to the watchlist, changed or not, so re-saving it retries
    /// directories that were missing on the last pass.
    fn reload_document(&mut self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        match name {
            state_paths::WATCHLIST_FILE => {
                self.declaration.reload();
                true
            }
            state_paths::QUEUE_FILE => {
                self.queue.reload();
                false
            }
            state_paths::CONFIG_FILE => {
                self.config.reload();
                false
            }
            _ => false,
        }
    }

    fn lost_subscription(&self, path: &Path, kind: &EventKind) -> bool {
        let gone = matches!(kind, EventKind::Remove(_))
            || matches!(kind, EventKind::Modify(ModifyKind::Name(RenameMode::From)));
        gone && !path.exists()
            && self
                .subscriptions
                .contains_key(&CanonicalPath::from_canonical(path.to_path_buf()))
    }

    /// Map an event on subscribed directories to lifecycle events.
    pub fn classify(&self, event: &Event) -> Vec<DirectoryEvent> {
        let at_root = |path: &Path| {
            path.parent()
                .map(|parent| {
                    self.subscriptions
                        .contains_key(&CanonicalPath::from_canonical(parent.to_path_buf()))
                })
                .unwrap_or(false)
        };
        let canonical = |path: &PathBuf| CanonicalPath::from_canonical(path.clone());

        match &event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let (Some(from), Some(to)) = (event.paths.first(), event.paths.get(1)) else {
                    return Vec::new();
                };
                let to_at_root = at_root(to);
                let mut out = Vec::new();
                if at_root(from) {
                    out.push(DirectoryEvent::Moved {
                        from: canonical(from),
                        to: to_at_root.then(|| canonical(to)),
                    });
                }
                if to_at_root {
                    out.push(DirectoryEvent::Modified(canonical(to)));
                }
                out
            }
            kind => event
                .paths
                .iter()
                .filter(|path| at_root(path.as_path()))
                .filter_map(|path| single_path_event(kind, canonical(path)))
                .collect(),
        }
    }
}

fn single_path_event(kind: &EventKind, path: CanonicalPath) -> Option<DirectoryEvent> {
    match kind {
        EventKind::Create(_) => Some(DirectoryEvent::Created(path)),
        EventKind::Remove(_) => Some(DirectoryEvent::Deleted(path)),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            Some(DirectoryEvent::Moved { from: path, to: None })
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(DirectoryEvent::Created(path)),
        EventKind::Modify(ModifyKind::Name(_)) => {
            if path.as_path().exists() {
                Some(DirectoryEvent::Created(path))
            } else {
                Some(DirectoryEvent::Moved { from: path, to: None })
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(DirectoryEvent::Modified(path)),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            Some(DirectoryEvent::Modified(path))
        }
        _ => None,
    }
}
