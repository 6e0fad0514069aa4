//! Queue drain (`pusher push`).

use pusher_core::{queue, store, CanonicalPath, Config};

use crate::error::UploadError;
use crate::lifecycle::UploadContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub uploaded: Vec<CanonicalPath>,
    pub failed: Vec<CanonicalPath>,
}

impl DrainReport {
    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }
}

/// Attempt one upload for every member of a snapshot of the queue.
///
/// Uploaded members are deleted locally and unscheduled; failed members stay
/// queued for the next drain.
pub fn drain(ctx: &UploadContext) -> Result<DrainReport, UploadError> {
    let snapshot = queue::load_at(ctx.home())?.to_do;
    let mut report = DrainReport::default();

    for path in snapshot {
        if ctx.upload(&path) {
            ctx.finish_uploaded(&path);
            report.uploaded.push(path);
        } else {
            report.failed.push(path);
        }
    }

    tracing::info!(
        attempted = report.attempted(),
        uploaded = report.uploaded.len(),
        failed = report.failed.len(),
        "queue drained",
    );
    Ok(report)
}

/// `pusher push`: make sure uploads have a container, then [`drain`].
///
/// With no `folder_id` recorded yet an existing remote container is looked
/// up before anything is created. A lookup failure is logged and the drain
/// still runs; the lifecycle then creates the container itself.
pub fn push_queue(ctx: &UploadContext) -> Result<DrainReport, UploadError> {
    let config: Config = store::load_at(ctx.home())?;
    if !config.has_folder() && !queue::load_at(ctx.home())?.to_do.is_empty() {
        if let Err(err) = ctx.ensure_container() {
            tracing::warn!(error = %err, "could not resolve upload container before push");
        }
    }
    drain(ctx)
}
