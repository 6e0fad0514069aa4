//! `pusher start | stop | logs` — background uploader lifecycle.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use serde_json::Value;

use pusher_daemon::paths::{logs_dir, stderr_log_path, stdout_log_path};
use pusher_daemon::{request_status_with_retries, request_stop, start_blocking, DaemonError};
use pusher_upload::auth;

const START_POLL_ATTEMPTS: usize = 50;
const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Arguments for `pusher start`.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Run the daemon in this process instead of detaching it.
    #[arg(long)]
    pub foreground: bool,
}

impl StartArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        auth::load_at(&home).context("cannot start the daemon")?;

        if self.foreground {
            return start_blocking(&home).context("daemon exited with error");
        }

        match request_status_with_retries(&home, 1) {
            Ok(status) => {
                println!("daemon already running{}", describe(&status));
                return Ok(());
            }
            Err(DaemonError::DaemonNotRunning { .. }) => {}
            Err(err) => return Err(err).context("failed to query daemon status"),
        }

        let mut child = spawn_detached(&home)?;
        let status = wait_for_socket(&home, &mut child)?;
        println!("daemon started{}", describe(&status));
        Ok(())
    }
}

fn spawn_detached(home: &Path) -> Result<Child> {
    let logs = logs_dir(home);
    fs::create_dir_all(&logs).with_context(|| format!("create {}", logs.display()))?;
    let stdout = append(&stdout_log_path(home))?;
    let stderr = append(&stderr_log_path(home))?;

    let exe = std::env::current_exe().context("could not locate the pusher binary")?;
    let mut command = Command::new(exe);
    command
        .args(["start", "--foreground"])
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.spawn().context("failed to spawn daemon process")
}

fn append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))
}

fn wait_for_socket(home: &Path, child: &mut Child) -> Result<Value> {
    for _ in 0..START_POLL_ATTEMPTS {
        if let Some(exit) = child.try_wait().context("failed to poll daemon process")? {
            bail!("daemon exited during startup ({exit}); run `pusher logs` for details");
        }
        match request_status_with_retries(home, 1) {
            Ok(status) => return Ok(status),
            Err(DaemonError::DaemonNotRunning { .. }) => sleep(START_POLL_INTERVAL),
            Err(err) => return Err(err).context("failed to query daemon status"),
        }
    }
    bail!("daemon did not open its control socket; run `pusher logs` for details")
}

fn describe(status: &Value) -> String {
    let pid = status["pid"].as_u64().map(|pid| format!(" (pid {pid}"));
    let since = status["started_at"]
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string());
    match (pid, since) {
        (Some(pid), Some(since)) => format!("{pid}, since {since})"),
        (Some(pid), None) => format!("{pid})"),
        _ => String::new(),
    }
}

pub fn stop() -> Result<()> {
    let home = super::home()?;
    match request_stop(&home) {
        Ok(()) => println!("daemon stop requested"),
        Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
        Err(err) => return Err(err).context("failed to stop daemon"),
    }
    Ok(())
}

/// Arguments for `pusher logs`.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home()?;
        if !self.stderr_only {
            print_tail(&stdout_log_path(&home), self.lines)
                .context("failed to read daemon stdout log")?;
        }
        print_tail(&stderr_log_path(&home), self.lines)
            .context("failed to read daemon stderr log")?;
        Ok(())
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        tail.push_back(line);
        if tail.len() > lines {
            tail.pop_front();
        }
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
