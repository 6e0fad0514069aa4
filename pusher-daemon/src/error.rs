use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its control socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("state error: {0}")]
    State(#[from] pusher_core::StateError),

    #[error(transparent)]
    Upload(#[from] pusher_upload::UploadError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_path_involved() {
        let err = DaemonError::DaemonNotRunning {
            socket: PathBuf::from("/home/u/.pusher/daemon.sock"),
        };
        assert!(err.to_string().contains("/home/u/.pusher/daemon.sock"));

        let err = io_err(
            "/var/log/pusher",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, DaemonError::Io { ref path, .. } if path.ends_with("pusher")));
    }
}
