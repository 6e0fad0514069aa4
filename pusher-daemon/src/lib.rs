//! Background uploader: directory watcher + per-path upload lanes + control
//! socket.

pub mod dispatcher;
mod error;
pub mod log_rotation;
pub mod paths;
pub mod pool;
pub mod protocol;
mod runtime;

pub use dispatcher::{Dispatcher, DirectoryWatcher, DispatcherStatus, LiveSubscription};
pub use error::DaemonError;
pub use pool::{PoolOptions, WorkerPool};
pub use protocol::{
    request_status_with_retries, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{init_tracing, run, run_with_uploader, start_blocking, StatusBoard};
