//! Per-file upload lifecycle.
//!
//! `Idle → Uploading → {Uploaded | Queued}` for root-level entries of a
//! watched directory:
//!
//! | event            | action                                             |
//! |------------------|----------------------------------------------------|
//! | created/modified | upload; success deletes + unschedules, failure schedules |
//! | moved            | unschedule the source                              |
//! | deleted          | unschedule                                         |
//!
//! Every remote call is blocking; the daemon runs these on a blocking pool.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use pusher_core::{queue, store, CanonicalPath, Config};

use crate::error::UploadError;
use crate::uploader::{RemoteId, Uploader, CONTAINER_NAME};

/// How many times one upload attempt may replace a missing container.
pub const MAX_CONTAINER_RECREATIONS: usize = 1;

/// A filesystem change to a root-level entry of a watched directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryEvent {
    Created(CanonicalPath),
    Modified(CanonicalPath),
    /// `to` is `None` when the entry left the watched directory.
    Moved {
        from: CanonicalPath,
        to: Option<CanonicalPath>,
    },
    Deleted(CanonicalPath),
}

impl DirectoryEvent {
    /// The path whose lane should handle this event.
    pub fn subject(&self) -> &CanonicalPath {
        match self {
            DirectoryEvent::Created(p) | DirectoryEvent::Modified(p) | DirectoryEvent::Deleted(p) => p,
            DirectoryEvent::Moved { from, .. } => from,
        }
    }
}

/// What [`UploadContext::handle_event`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    Uploaded,
    Queued,
    Unscheduled,
    Ignored,
}

/// Everything an upload needs: the state home and the remote store.
pub struct UploadContext {
    home: PathBuf,
    uploader: Arc<dyn Uploader>,
    container_guard: Mutex<()>,
}

impl UploadContext {
    pub fn new(home: impl Into<PathBuf>, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            home: home.into(),
            uploader,
            container_guard: Mutex::new(()),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Upload `path` into the configured container.
    ///
    /// Returns `true` on success. Failures are logged, never propagated.
    pub fn upload(&self, path: &CanonicalPath) -> bool {
        match self.try_upload(path) {
            Ok(id) => {
                tracing::info!(path = %path, remote_id = %id, "uploaded");
                true
            }
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "upload failed");
                false
            }
        }
    }

    fn try_upload(&self, path: &CanonicalPath) -> Result<RemoteId, UploadError> {
        let mut recreations = 0;
        loop {
            let folder_id = store::load_at::<Config>(&self.home)?.folder_id;
            match self.uploader.create(path.as_path(), &folder_id) {
                Ok(id) => return Ok(id),
                Err(err) if err.is_transient() && recreations < MAX_CONTAINER_RECREATIONS => {
                    recreations += 1;
                    tracing::warn!(
                        path = %path,
                        folder_id = %folder_id,
                        error = %err,
                        "upload container missing; recreating",
                    );
                    self.recreate_container(&folder_id)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Replace the container recorded as `stale` with a new one.
    ///
    /// If another worker already replaced it, the recorded id is reused.
    fn recreate_container(&self, stale: &str) -> Result<String, UploadError> {
        let _guard = self
            .container_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current: Config = store::load_at(&self.home)?;
        if current.has_folder() && current.folder_id != stale {
            return Ok(current.folder_id);
        }
        let id = self.uploader.create_container(CONTAINER_NAME)?;
        self.record_container(&id)?;
        tracing::info!(folder_id = %id, "created upload container");
        Ok(id.0)
    }

    /// Make sure `config.json` names a container: reuse an existing remote
    /// container called [`CONTAINER_NAME`], otherwise create one.
    pub fn ensure_container(&self) -> Result<String, UploadError> {
        let _guard = self
            .container_guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let current: Config = store::load_at(&self.home)?;
        if current.has_folder() {
            return Ok(current.folder_id);
        }
        let id = match self.uploader.find_container(CONTAINER_NAME)? {
            Some(id) => {
                tracing::info!(folder_id = %id, "found existing upload container");
                id
            }
            None => {
                let id = self.uploader.create_container(CONTAINER_NAME)?;
                tracing::info!(folder_id = %id, "created upload container");
                id
            }
        };
        self.record_container(&id)?;
        Ok(id.0)
    }

    fn record_container(&self, id: &RemoteId) -> Result<(), UploadError> {
        store::update_at::<Config, _>(&self.home, |config| {
            config.folder_id = id.0.clone();
        })?;
        Ok(())
    }

    /// Post-conditions of a successful upload: the local copy is removed
    /// and the path leaves the queue.
    pub fn finish_uploaded(&self, path: &CanonicalPath) {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_file() => match fs::remove_file(path) {
                Ok(()) => tracing::info!(path = %path, "deleted"),
                Err(err) => tracing::warn!(path = %path, error = %err, "could not delete uploaded file"),
            },
            _ => {}
        }
        self.unschedule(path);
    }

    /// Drive one event through the lifecycle.
    pub fn handle_event(&self, event: &DirectoryEvent) -> LifecycleOutcome {
        match event {
            DirectoryEvent::Created(path) | DirectoryEvent::Modified(path) => self.on_changed(path),
            DirectoryEvent::Moved { from, to } => {
                tracing::debug!(from = %from, to = ?to.as_ref().map(CanonicalPath::as_path), "moved");
                self.unschedule(from);
                LifecycleOutcome::Unscheduled
            }
            DirectoryEvent::Deleted(path) => {
                self.unschedule(path);
                LifecycleOutcome::Unscheduled
            }
        }
    }

    fn on_changed(&self, path: &CanonicalPath) -> LifecycleOutcome {
        match fs::metadata(path) {
            Ok(meta) if !meta.is_dir() => {}
            _ => {
                tracing::debug!(path = %path, "entry gone or not a file; ignoring");
                return LifecycleOutcome::Ignored;
            }
        }

        if self.upload(path) {
            self.finish_uploaded(path);
            LifecycleOutcome::Uploaded
        } else {
            if let Err(err) = queue::schedule_at(&self.home, path) {
                tracing::error!(path = %path, error = %err, "failed to schedule for retry");
            }
            LifecycleOutcome::Queued
        }
    }

    fn unschedule(&self, path: &CanonicalPath) {
        if let Err(err) = queue::unschedule_at(&self.home, path) {
            tracing::error!(path = %path, error = %err, "failed to unschedule");
        }
    }
}
