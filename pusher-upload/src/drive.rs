//! Google Drive v3 adapter for [`Uploader`].
//!
//! - create: `POST /upload/drive/v3/files?uploadType=multipart`
//!   (`multipart/related`: JSON metadata part + raw content part)
//! - create container: `POST /drive/v3/files` with the folder mime type
//! - find container: `GET /drive/v3/files?q=...`
//!
//! Every request goes through one `ureq::Agent` built with the configured
//! timeout.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use pusher_core::Settings;
use serde::Deserialize;
use serde_json::json;

use crate::auth::Credentials;
use crate::error::{io_err, UploadError};
use crate::uploader::{RemoteId, Uploader};

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

pub struct DriveUploader {
    agent: ureq::Agent,
    api: String,
    access_token: String,
}

impl DriveUploader {
    pub fn new(settings: &Settings, credentials: &Credentials) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.upload_timeout)
            .build();
        Self {
            agent,
            api: settings.drive_api.clone(),
            access_token: credentials.access_token.clone(),
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl Uploader for DriveUploader {
    fn create(&self, local: &Path, parent_id: &str) -> Result<RemoteId, UploadError> {
        if parent_id.trim().is_empty() {
            return Err(UploadError::ParentMissing {
                folder_id: String::new(),
            });
        }

        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io_err(
                    local,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
        let contents = std::fs::read(local).map_err(|e| io_err(local, e))?;

        let metadata = json!({ "name": name, "parents": [parent_id] });
        let boundary = multipart_boundary();
        let body = multipart_related(&boundary, &metadata, &contents);

        let url = format!("{}/upload/drive/v3/files", self.api);
        let response = self
            .agent
            .post(&url)
            .query("uploadType", "multipart")
            .query("fields", "id")
            .set("Authorization", &self.bearer())
            .set(
                "Content-Type",
                &format!("multipart/related; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|err| classify(err, Some(parent_id)))?;

        let file: DriveFile = response
            .into_json()
            .map_err(|e| UploadError::Transport(format!("invalid upload response: {e}")))?;
        tracing::debug!(path = %local.display(), id = %file.id, "drive object created");
        Ok(RemoteId(file.id))
    }

    fn create_container(&self, name: &str) -> Result<RemoteId, UploadError> {
        let url = format!("{}/drive/v3/files", self.api);
        let response = self
            .agent
            .post(&url)
            .query("fields", "id")
            .set("Authorization", &self.bearer())
            .send_json(json!({ "name": name, "mimeType": FOLDER_MIME }))
            .map_err(|err| classify(err, None))?;

        let folder: DriveFile = response
            .into_json()
            .map_err(|e| UploadError::Transport(format!("invalid folder response: {e}")))?;
        Ok(RemoteId(folder.id))
    }

    fn find_container(&self, name: &str) -> Result<Option<RemoteId>, UploadError> {
        let query = format!(
            "name = '{}' and mimeType = '{FOLDER_MIME}' and 'root' in parents and trashed = false",
            name.replace('\'', "\\'")
        );
        let url = format!("{}/drive/v3/files", self.api);
        let response = self
            .agent
            .get(&url)
            .query("q", &query)
            .query("fields", "files(id)")
            .query("spaces", "drive")
            .set("Authorization", &self.bearer())
            .call()
            .map_err(|err| classify(err, None))?;

        let list: DriveFileList = response
            .into_json()
            .map_err(|e| UploadError::Transport(format!("invalid list response: {e}")))?;
        Ok(list.files.into_iter().next().map(|f| RemoteId(f.id)))
    }
}

/// Map a `ureq` failure onto [`UploadError`].
///
/// A 404 while creating under `parent_id` means the container is gone
/// (e.g. it was deleted permanently on the Drive side).
fn classify(err: ureq::Error, parent_id: Option<&str>) -> UploadError {
    match err {
        ureq::Error::Status(404, _) if parent_id.is_some() => UploadError::ParentMissing {
            folder_id: parent_id.unwrap_or_default().to_string(),
        },
        ureq::Error::Status(status, response) => UploadError::Http {
            status,
            body: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => UploadError::Transport(transport.to_string()),
    }
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("pusher-{}-{nanos:x}", std::process::id())
}

fn multipart_related(boundary: &str, metadata: &serde_json::Value, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(contents.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
