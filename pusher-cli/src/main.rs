//! Pusher — upload files dropped into watched directories to Google Drive.
//!
//! # Usage
//!
//! ```text
//! pusher watch <paths...>
//! pusher exclude <paths...>
//! pusher remove <paths...>
//! pusher watchlist
//! pusher status [--json]
//! pusher push
//! pusher collect
//! pusher add-auth --token <token>
//! pusher reset-auth
//! pusher start [--foreground]
//! pusher stop
//! pusher logs [--lines N] [--stderr-only]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    auth::AddAuthArgs,
    daemon::{LogsArgs, StartArgs},
    queue::StatusArgs,
    watchlist::PathsArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "pusher",
    version,
    about = "Upload files dropped into watched directories to Google Drive",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add directories to the watch list.
    Watch(PathsArgs),

    /// Move directories to the exclude list; the daemon unsubscribes them.
    Exclude(PathsArgs),

    /// Forget directories entirely (a live subscription stays until restart).
    Remove(PathsArgs),

    /// Print the watch and exclude lists.
    Watchlist,

    /// Show queued and unqueued files per watched directory.
    Status(StatusArgs),

    /// Retry every file in the upload queue once.
    Push,

    /// Queue every root-level file in the watched directories.
    Collect,

    /// Save an OAuth access token for Google Drive.
    AddAuth(AddAuthArgs),

    /// Delete saved credentials.
    ResetAuth,

    /// Start the background uploader.
    Start(StartArgs),

    /// Ask a running daemon to shut down.
    Stop,

    /// Print recent daemon log lines.
    Logs(LogsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Start(_)) {
        init_tracing();
    }

    match cli.command {
        Commands::Watch(args) => commands::watchlist::watch(args),
        Commands::Exclude(args) => commands::watchlist::exclude(args),
        Commands::Remove(args) => commands::watchlist::remove(args),
        Commands::Watchlist => commands::watchlist::show(),
        Commands::Status(args) => args.run(),
        Commands::Push => commands::queue::push(),
        Commands::Collect => commands::queue::collect(),
        Commands::AddAuth(args) => args.run(),
        Commands::ResetAuth => commands::auth::reset(),
        Commands::Start(args) => args.run(),
        Commands::Stop => commands::daemon::stop(),
        Commands::Logs(args) => args.run(),
    }
}

/// Compact stderr logging for short-lived commands. `start --foreground`
/// installs the daemon's own subscriber instead.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
