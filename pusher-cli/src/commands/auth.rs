//! `pusher add-auth | reset-auth` — manage the saved Drive access token.

use anyhow::{Context, Result};
use clap::Args;

use pusher_core::paths::credentials_path_at;
use pusher_upload::auth;

/// Arguments for `pusher add-auth`.
#[derive(Args, Debug)]
pub struct AddAuthArgs {
    /// OAuth access token with the `drive.file` scope.
    #[arg(long, env = "PUSHER_ACCESS_TOKEN", hide_env_values = true)]
    pub token: String,
}

impl AddAuthArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let creds = auth::add_at(&home, &self.token).context("failed to save credentials")?;
        println!(
            "credentials saved to {} at {}",
            credentials_path_at(&home).display(),
            creds.saved_at.to_rfc3339()
        );
        Ok(())
    }
}

pub fn reset() -> Result<()> {
    let home = super::home()?;
    if auth::reset_at(&home).context("failed to remove credentials")? {
        println!("credentials removed");
    } else {
        println!("no credentials saved");
    }
    Ok(())
}
