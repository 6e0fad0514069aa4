pub mod auth;
pub mod daemon;
pub mod queue;
pub mod watchlist;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
