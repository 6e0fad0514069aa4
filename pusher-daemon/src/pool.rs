//! Per-path upload lanes.
//!
//! Every canonical file path gets its own lane: an unbounded channel drained
//! by one task, so events for one path run strictly in order while different
//! paths proceed concurrently. A shared semaphore caps the number of uploads
//! running at once; the uploads themselves run on the blocking pool.
//!
//! A lane waits for its path to go quiet before acting and then handles only
//! the latest event of the burst. An idle lane closes itself; if events
//! slipped in while it was closing it handles them before exiting, and the
//! replacement lane waits for it to finish first.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use pusher_core::{CanonicalPath, Settings};
use pusher_upload::{DirectoryEvent, LifecycleOutcome, UploadContext};

use crate::paths::{DEBOUNCE_WINDOW, LANE_IDLE_TIMEOUT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    pub quiet: Duration,
    pub idle: Duration,
}

impl From<&Settings> for PoolOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            workers: settings.workers.max(1),
            quiet: DEBOUNCE_WINDOW,
            idle: LANE_IDLE_TIMEOUT,
        }
    }
}

struct Lane {
    tx: mpsc::UnboundedSender<DirectoryEvent>,
    handle: JoinHandle<()>,
}

#[derive(Clone)]
struct LaneShared {
    ctx: Arc<UploadContext>,
    permits: Arc<Semaphore>,
    options: PoolOptions,
    shutdown: broadcast::Sender<()>,
}

pub struct WorkerPool {
    shared: LaneShared,
    lanes: HashMap<CanonicalPath, Lane>,
}

impl WorkerPool {
    pub fn new(
        ctx: Arc<UploadContext>,
        options: PoolOptions,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            shared: LaneShared {
                ctx,
                permits: Arc::new(Semaphore::new(options.workers.max(1))),
                options,
                shutdown,
            },
            lanes: HashMap::new(),
        }
    }

    /// Hand `event` to the lane of its path, spawning the lane if needed.
    pub fn dispatch(&mut self, event: DirectoryEvent) {
        self.lanes.retain(|_, lane| !lane.handle.is_finished());

        let key = event.subject().clone();
        let event = match self.lanes.get(&key) {
            Some(lane) => match lane.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let predecessor = self.lanes.remove(&key).map(|lane| lane.handle);
        let (tx, rx) = mpsc::unbounded_channel();
        // Cannot fail: the receiver is alive until the lane task drops it.
        let _ = tx.send(event);
        let handle = tokio::spawn(run_lane(
            key.clone(),
            rx,
            predecessor,
            self.shared.clone(),
            self.shared.shutdown.subscribe(),
        ));
        self.lanes.insert(key, Lane { tx, handle });
    }

    /// Lanes that have not exited yet.
    pub fn active_lanes(&self) -> usize {
        self.lanes
            .values()
            .filter(|lane| !lane.handle.is_finished())
            .count()
    }

    /// Wait for every lane to exit. In-flight uploads complete; events still
    /// waiting in a lane are dropped once shutdown has been signalled.
    pub async fn join(self) {
        for (path, lane) in self.lanes {
            drop(lane.tx);
            if let Err(err) = lane.handle.await {
                tracing::error!(path = %path, error = %err, "upload lane panicked");
            }
        }
    }
}

async fn run_lane(
    path: CanonicalPath,
    mut rx: mpsc::UnboundedReceiver<DirectoryEvent>,
    predecessor: Option<JoinHandle<()>>,
    shared: LaneShared,
    mut shutdown: broadcast::Receiver<()>,
) {
    if let Some(previous) = predecessor {
        let _ = previous.await;
    }

    loop {
        let first = tokio::select! {
            biased;
            _ = shutdown.recv() => return,
            next = rx.recv() => next,
            _ = tokio::time::sleep(shared.options.idle) => {
                rx.close();
                None
            }
        };
        let Some(first) = first else { break };
        let Some(latest) = settle(first, &mut rx, shared.options.quiet, &mut shutdown).await else {
            return;
        };
        if !process(&path, latest, &shared, &mut shutdown).await {
            return;
        }
    }

    // Closed: handle whatever arrived before the close, in order.
    while let Ok(event) = rx.try_recv() {
        if !process(&path, event, &shared, &mut shutdown).await {
            return;
        }
    }
    tracing::trace!(path = %path, "lane idle; exiting");
}

/// Wait until no event arrives for `quiet`; the last one wins.
/// Returns `None` when shutdown was signalled meanwhile.
async fn settle(
    mut latest: DirectoryEvent,
    rx: &mut mpsc::UnboundedReceiver<DirectoryEvent>,
    quiet: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> Option<DirectoryEvent> {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => return None,
            next = rx.recv() => match next {
                Some(event) => latest = event,
                None => return Some(latest),
            },
            _ = tokio::time::sleep(quiet) => return Some(latest),
        }
    }
}

/// Run one event through the lifecycle on the blocking pool. Returns
/// `false` when shutdown arrived before a permit was available.
async fn process(
    path: &CanonicalPath,
    event: DirectoryEvent,
    shared: &LaneShared,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    let permit = tokio::select! {
        biased;
        _ = shutdown.recv() => return false,
        permit = shared.permits.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return false,
        },
    };

    let ctx = shared.ctx.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        ctx.handle_event(&event)
    })
    .await;

    match result {
        Ok(outcome @ (LifecycleOutcome::Uploaded | LifecycleOutcome::Queued)) => {
            tracing::debug!(path = %path, outcome = ?outcome, "lane event handled");
        }
        Ok(outcome) => tracing::trace!(path = %path, outcome = ?outcome, "lane event handled"),
        Err(err) => tracing::error!(path = %path, error = %err, "upload task failed"),
    }
    true
}
