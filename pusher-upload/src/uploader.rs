//! Remote object store port.
//!
//! The lifecycle only needs three operations from the remote side; the Drive
//! adapter in [`crate::drive`] implements them over HTTP and tests use a
//! scripted fake.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Name of the remote container uploads are created under.
pub const CONTAINER_NAME: &str = "PusherUploads";

/// Identifier assigned by the remote store to an object or container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteId(pub String);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RemoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RemoteId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Blocking client for the remote store.
///
/// Implementations must report a missing parent container as
/// [`UploadError::ParentMissing`] so the caller can recreate it.
pub trait Uploader: Send + Sync {
    /// Create an object named after `local`'s base name, holding its current
    /// contents, under container `parent_id`.
    fn create(&self, local: &Path, parent_id: &str) -> Result<RemoteId, UploadError>;

    /// Create a new container called `name`.
    fn create_container(&self, name: &str) -> Result<RemoteId, UploadError>;

    /// Look up an existing container called `name`.
    fn find_container(&self, name: &str) -> Result<Option<RemoteId>, UploadError>;
}
