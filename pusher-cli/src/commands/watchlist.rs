//! `pusher watch | exclude | remove | watchlist` — edit and show the watch
//! declaration. A running daemon picks up every change on its own.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use pusher_core::{watchlist, CanonicalPath};

/// Directories to act on; relative paths resolve against the current
/// directory.
#[derive(Args, Debug)]
pub struct PathsArgs {
    #[arg(required = true, value_name = "PATH")]
    pub paths: Vec<PathBuf>,
}

#[derive(Tabled)]
struct WatchlistRow {
    #[tabled(rename = "list")]
    list: String,
    #[tabled(rename = "directory")]
    directory: String,
    #[tabled(rename = "on disk")]
    on_disk: String,
}

pub fn watch(args: PathsArgs) -> Result<()> {
    let home = super::home()?;
    let added = watchlist::watch_at(&home, &args.paths).context("failed to update watch list")?;
    print_changed("watching", &added);
    Ok(())
}

pub fn exclude(args: PathsArgs) -> Result<()> {
    let home = super::home()?;
    let excluded =
        watchlist::exclude_at(&home, &args.paths).context("failed to update exclude list")?;
    print_changed("excluded", &excluded);
    Ok(())
}

pub fn remove(args: PathsArgs) -> Result<()> {
    let home = super::home()?;
    let removed = watchlist::remove_at(&home, &args.paths).context("failed to update watch list")?;
    print_changed("removed", &removed);
    Ok(())
}

pub fn show() -> Result<()> {
    let home = super::home()?;
    let declaration = watchlist::load_at(&home).context("failed to load watch list")?;

    if declaration.watch.is_empty() && declaration.exclude.is_empty() {
        println!("Watch list is empty. Run `pusher watch <dir>` to add one.");
        return Ok(());
    }

    let rows: Vec<WatchlistRow> = declaration
        .watch
        .iter()
        .map(|dir| row("watch", dir))
        .chain(declaration.exclude.iter().map(|dir| row("exclude", dir)))
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn row(list: &str, dir: &CanonicalPath) -> WatchlistRow {
    let on_disk = if dir.as_path().is_dir() {
        "yes".green().to_string()
    } else {
        "missing".yellow().to_string()
    };
    let list = match list {
        "watch" => list.green().bold().to_string(),
        _ => list.red().to_string(),
    };
    WatchlistRow {
        list,
        directory: dir.to_string(),
        on_disk,
    }
}

fn print_changed(verb: &str, paths: &[CanonicalPath]) {
    for path in paths {
        println!("{verb} {path}");
    }
}
