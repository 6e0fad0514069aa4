//! `pusher status | push | collect` — inspect and drain the upload queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use pusher_core::{queue, queue::DirectoryStatus, CanonicalPath, Settings};
use pusher_daemon::{request_status_with_retries, DaemonError};
use pusher_upload::{auth, push_queue, DriveUploader, UploadContext, Uploader};

/// Arguments for `pusher status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReportJson {
    daemon_running: bool,
    queued: usize,
    directories: Vec<DirectoryStatusJson>,
}

#[derive(Serialize)]
struct DirectoryStatusJson {
    dir: String,
    queued: Vec<String>,
    unqueued: Vec<String>,
}

#[derive(Tabled)]
struct FileRow {
    #[tabled(rename = "file")]
    file: String,
    #[tabled(rename = "state")]
    state: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        let directories =
            queue::status_at(&home).context("failed to read queue status; check watchlist.json")?;
        let queued = queue::load_at(&home)
            .context("failed to load queue")?
            .to_do
            .len();
        let daemon_running = daemon_running(&home)?;

        if self.json {
            let payload = StatusReportJson {
                daemon_running,
                queued,
                directories: directories.into_iter().map(to_json).collect(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        let daemon = if daemon_running {
            "running".green().to_string()
        } else {
            "stopped".red().to_string()
        };
        println!("daemon {daemon} | {queued} queued");
        if directories.is_empty() {
            println!("No watched directories exist on disk.");
            return Ok(());
        }
        for status in directories {
            print_directory(status);
        }
        Ok(())
    }
}

fn daemon_running(home: &std::path::Path) -> Result<bool> {
    match request_status_with_retries(home, 1) {
        Ok(_) => Ok(true),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(false),
        Err(err) => Err(err).context("failed to query daemon status"),
    }
}

fn to_json(status: DirectoryStatus) -> DirectoryStatusJson {
    let names = |paths: Vec<CanonicalPath>| -> Vec<String> {
        paths.iter().map(ToString::to_string).collect()
    };
    DirectoryStatusJson {
        dir: status.dir.to_string(),
        queued: names(status.queued),
        unqueued: names(status.unqueued),
    }
}

fn print_directory(status: DirectoryStatus) {
    println!("{}", status.dir.to_string().bold());
    if status.queued.is_empty() && status.unqueued.is_empty() {
        println!("  (empty)");
        return;
    }

    let rows: Vec<FileRow> = status
        .queued
        .iter()
        .map(|path| FileRow {
            file: file_name(path),
            state: "queued".yellow().to_string(),
        })
        .chain(status.unqueued.iter().map(|path| FileRow {
            file: file_name(path),
            state: "not queued".bright_black().to_string(),
        }))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn file_name(path: &CanonicalPath) -> String {
    path.as_path()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

pub fn push() -> Result<()> {
    let home = super::home()?;
    let credentials = auth::load_at(&home).context("cannot push without credentials")?;
    let settings = Settings::from_env();
    let uploader: Arc<dyn Uploader> = Arc::new(DriveUploader::new(&settings, &credentials));
    let ctx = UploadContext::new(home, uploader);

    let report = push_queue(&ctx).context("failed to drain upload queue")?;
    if report.attempted() == 0 {
        println!("Queue is empty.");
        return Ok(());
    }
    for path in &report.uploaded {
        println!("{} {path}", "uploaded".green());
    }
    for path in &report.failed {
        println!("{} {path}", "failed".red());
    }
    println!(
        "{} uploaded, {} still queued",
        report.uploaded.len(),
        report.failed.len()
    );
    Ok(())
}

pub fn collect() -> Result<()> {
    let home = super::home()?;
    let report = queue::collect_at(&home).context("failed to collect files")?;
    for path in &report.scheduled {
        println!("queued {path}");
    }
    println!(
        "found {} files, queued {} new",
        report.found,
        report.scheduled.len()
    );
    Ok(())
}
