//! Error types for pusher-upload.

use std::path::PathBuf;

use thiserror::Error;

use pusher_core::StateError;

/// All errors that can arise from talking to the remote store.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The parent container named in `config.json` does not exist remotely
    /// (or no container id has been recorded yet). Recoverable by creating a
    /// new container and retrying.
    #[error("parent container '{folder_id}' is missing")]
    ParentMissing { folder_id: String },

    /// The remote answered with a non-success status.
    #[error("remote rejected request ({status}): {body}")]
    Http { status: u16, body: String },

    /// No response: DNS, connect, TLS, timeout.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local read failure, with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No usable credentials were found.
    #[error("no saved credentials at {path}; run `pusher add-auth` first")]
    AuthMissing { path: PathBuf },

    /// `add-auth` refused to overwrite existing credentials.
    #[error("credentials already saved at {path}; clear them with `pusher reset-auth` first")]
    AuthExists { path: PathBuf },

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    /// Only a missing parent container is retried within the same attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::ParentMissing { .. })
    }
}

/// Convenience constructor for [`UploadError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> UploadError {
    UploadError::Io {
        path: path.into(),
        source,
    }
}
