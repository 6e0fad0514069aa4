//! # pusher-upload
//!
//! Remote side of pusher: the [`Uploader`] port and its Google Drive
//! adapter, saved credentials, the per-file [`lifecycle`], and the queue
//! drain behind `pusher push` ([`push::push_queue`]).

pub mod auth;
pub mod drive;
pub mod error;
pub mod lifecycle;
pub mod push;
pub mod uploader;

pub use drive::DriveUploader;
pub use error::UploadError;
pub use lifecycle::{DirectoryEvent, LifecycleOutcome, UploadContext, MAX_CONTAINER_RECREATIONS};
pub use push::{drain, push_queue, DrainReport};
pub use uploader::{RemoteId, Uploader, CONTAINER_NAME};
