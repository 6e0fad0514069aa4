//! Saved remote credentials (`auth_creds.json`).
//!
//! `add-auth` writes the file once; a second `add-auth` is refused until
//! `reset-auth` removes it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pusher_core::paths::credentials_path_at;
use pusher_core::store::{ensure_state_root_at, StateLock};

use crate::error::{io_err, UploadError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub saved_at: DateTime<Utc>,
}

/// Read the saved credentials. A missing file is [`UploadError::AuthMissing`].
pub fn load_at(home: &Path) -> Result<Credentials, UploadError> {
    let path = credentials_path_at(home);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(UploadError::AuthMissing { path });
        }
        Err(err) => return Err(io_err(&path, err)),
    };
    let creds: Credentials = serde_json::from_str(&raw)?;
    if creds.access_token.trim().is_empty() {
        return Err(UploadError::AuthMissing { path });
    }
    Ok(creds)
}

/// Whether credentials are saved.
pub fn exists_at(home: &Path) -> bool {
    credentials_path_at(home).is_file()
}

/// Save `token` as the access token. Refuses to replace existing credentials.
pub fn add_at(home: &Path, token: &str) -> Result<Credentials, UploadError> {
    let token = token.trim();
    let path = credentials_path_at(home);
    if token.is_empty() {
        return Err(io_err(
            &path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "access token is empty"),
        ));
    }

    let _lock = StateLock::acquire(home)?;
    if path.exists() {
        return Err(UploadError::AuthExists { path });
    }
    ensure_state_root_at(home)?;

    let creds = Credentials {
        access_token: token.to_string(),
        saved_at: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&creds)?;

    let tmp = path.with_file_name(format!(".auth_creds.{}.tmp", std::process::id()));
    let mut file = private_file(&tmp)?;
    file.write_all(json.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|e| io_err(&tmp, e))?;
    drop(file);
    if let Err(err) = fs::rename(&tmp, &path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(&path, err));
    }

    tracing::info!(path = %path.display(), "credentials saved");
    Ok(creds)
}

/// Remove saved credentials. Returns `false` if there were none.
pub fn reset_at(home: &Path) -> Result<bool, UploadError> {
    let path = credentials_path_at(home);
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "credentials removed");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(&path, err)),
    }
}

#[cfg(unix)]
fn private_file(path: &Path) -> Result<fs::File, UploadError> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> Result<fs::File, UploadError> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| io_err(path, e))
}
