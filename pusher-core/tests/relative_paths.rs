//! Relative inputs are stored in canonical absolute form.
//!
//! Lives in its own test binary because it changes the process working
//! directory.

use std::fs;

use pusher_core::{queue, watchlist};

#[test]
fn relative_inputs_are_persisted_canonical() {
    let home = tempfile::TempDir::new().expect("home");
    let work = tempfile::TempDir::new().expect("work");
    let dir = work.path().join("D");
    fs::create_dir(&dir).expect("mkdir");
    fs::write(dir.join("a.txt"), "a").expect("write");

    std::env::set_current_dir(work.path()).expect("chdir");

    watchlist::watch_at(home.path(), &["./D"]).expect("watch");
    queue::schedule_at(home.path(), "D/../D/a.txt").expect("schedule");

    let canonical_dir = dir.canonicalize().expect("canonicalize");
    let decl = watchlist::load_at(home.path()).expect("load");
    let stored: Vec<_> = decl.watch.iter().map(|p| p.as_path().to_path_buf()).collect();
    assert_eq!(stored, vec![canonical_dir.clone()]);

    let raw = fs::read_to_string(pusher_core::paths::watchlist_path_at(home.path())).expect("read");
    assert!(!raw.contains("./D"), "relative form leaked into document: {raw}");

    let q = queue::load_at(home.path()).expect("queue");
    let entries: Vec<_> = q.to_do.iter().map(|p| p.as_path().to_path_buf()).collect();
    assert_eq!(entries, vec![canonical_dir.join("a.txt")]);
}
