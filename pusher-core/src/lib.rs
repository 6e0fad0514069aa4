//! Pusher core library — state documents, watch declaration, retry queue.
//!
//! - [`types`] — [`CanonicalPath`] and the three persisted documents
//! - [`store`] — load / save / locked update of the JSON documents
//! - [`watchlist`] — `watch` / `exclude` / `remove` and [`watchlist::reconcile`]
//! - [`queue`] — schedule / unschedule / collect / status
//! - [`settings`] — environment tunables

pub mod error;
pub mod paths;
pub mod queue;
pub mod settings;
pub mod store;
pub mod types;
pub mod watchlist;

pub use error::StateError;
pub use settings::Settings;
pub use store::{Document, DocumentCache};
pub use types::{CanonicalPath, Config, QueueState, WatchDeclaration};
