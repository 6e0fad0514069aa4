//! Watch declaration command tests: persisted shape, list moves, and the
//! interplay with reconciliation.

use std::collections::BTreeSet;
use std::fs;

use assert_fs::prelude::*;
use predicates::prelude::*;
use pusher_core::{
    paths, store,
    types::{CanonicalPath, WatchDeclaration},
    watchlist,
};
use rstest::rstest;

fn canon(path: &std::path::Path) -> CanonicalPath {
    CanonicalPath::resolve(path).expect("resolve")
}

// ---------------------------------------------------------------------------
// 1. Persisted document
// ---------------------------------------------------------------------------

#[test]
fn watch_persists_plain_json_document() {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");

    watchlist::watch_at(home.path(), &[target.path()]).expect("watch");

    let raw = fs::read_to_string(paths::watchlist_path_at(home.path())).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    let expected = canon(target.path()).to_string();
    assert_eq!(value["watch"], serde_json::json!([expected]));
    assert_eq!(value["exclude"], serde_json::json!([]));
}

#[test]
fn watchlist_file_is_created_on_first_load() {
    let home = assert_fs::TempDir::new().expect("home");
    let decl = watchlist::load_at(home.path()).expect("load");
    assert_eq!(decl, WatchDeclaration::default());

    home.child(".config/pusher/watchlist.json")
        .assert(predicate::str::contains("\"watch\""));
}

#[test]
fn watch_deduplicates_repeated_paths() {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    let nested_alias = target.path().join("x").join("..");
    fs::create_dir(target.path().join("x")).expect("mkdir");

    watchlist::watch_at(home.path(), &[target.path(), target.path()]).expect("watch");
    watchlist::watch_at(home.path(), &[nested_alias]).expect("watch alias");

    let decl = watchlist::load_at(home.path()).expect("load");
    assert_eq!(decl.watch.len(), 1);
}

// ---------------------------------------------------------------------------
// 2. List moves
// ---------------------------------------------------------------------------

#[test]
fn watch_then_exclude_moves_path_to_exclude() {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    let p = canon(target.path());

    watchlist::watch_at(home.path(), &[target.path()]).expect("watch");
    watchlist::exclude_at(home.path(), &[target.path()]).expect("exclude");

    let decl = watchlist::load_at(home.path()).expect("load");
    assert!(decl.exclude.contains(&p));
    assert!(!decl.watch.contains(&p));
}

#[test]
fn exclude_then_watch_moves_path_back() {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    let p = canon(target.path());

    watchlist::exclude_at(home.path(), &[target.path()]).expect("exclude");
    watchlist::watch_at(home.path(), &[target.path()]).expect("watch");

    let decl = watchlist::load_at(home.path()).expect("load");
    assert!(decl.watch.contains(&p));
    assert!(!decl.exclude.contains(&p));
}

#[rstest]
#[case::after_exclude(true)]
#[case::after_watch(false)]
fn remove_strips_path_from_both_lists(#[case] excluded_first: bool) {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    let p = canon(target.path());

    if excluded_first {
        watchlist::exclude_at(home.path(), &[target.path()]).expect("exclude");
    } else {
        watchlist::watch_at(home.path(), &[target.path()]).expect("watch");
    }
    watchlist::remove_at(home.path(), &[target.path()]).expect("remove");

    let decl = watchlist::load_at(home.path()).expect("load");
    assert!(!decl.watch.contains(&p));
    assert!(!decl.exclude.contains(&p));
}

#[test]
fn commands_accept_paths_that_do_not_exist_yet() {
    let home = assert_fs::TempDir::new().expect("home");
    let parent = assert_fs::TempDir::new().expect("parent");
    let later = parent.path().join("later");

    let recorded = watchlist::watch_at(home.path(), &[&later]).expect("watch");
    assert_eq!(recorded[0].as_path(), parent.path().canonicalize().unwrap().join("later"));
}

// ---------------------------------------------------------------------------
// 3. Declaration → reconciliation
// ---------------------------------------------------------------------------

#[test]
fn missing_dir_becomes_eligible_once_it_exists() {
    let home = assert_fs::TempDir::new().expect("home");
    let parent = assert_fs::TempDir::new().expect("parent");
    let later = parent.path().join("later");

    watchlist::watch_at(home.path(), &[&later]).expect("watch");
    let decl = watchlist::load_at(home.path()).expect("load");
    assert!(watchlist::reconcile(&decl, std::iter::empty()).to_add.is_empty());

    fs::create_dir(&later).expect("mkdir");
    let delta = watchlist::reconcile(&decl, std::iter::empty());
    assert_eq!(delta.to_add, BTreeSet::from([canon(&later)]));
}

#[test]
fn remove_of_live_watch_keeps_subscription() {
    // Accepted behavior: remove forgets the path but only exclude cancels
    // a live watch.
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    let p = canon(target.path());

    watchlist::watch_at(home.path(), &[target.path()]).expect("watch");
    let decl = watchlist::load_at(home.path()).expect("load");
    let mut active: BTreeSet<CanonicalPath> = watchlist::reconcile(&decl, std::iter::empty()).to_add;
    assert!(active.contains(&p));

    watchlist::remove_at(home.path(), &[target.path()]).expect("remove");
    let decl = watchlist::load_at(home.path()).expect("load");
    let delta = watchlist::reconcile(&decl, active.iter());
    for gone in &delta.to_remove {
        active.remove(gone);
    }
    assert!(active.contains(&p), "remove must not cancel a live subscription");

    watchlist::exclude_at(home.path(), &[target.path()]).expect("exclude");
    let decl = watchlist::load_at(home.path()).expect("load");
    let delta = watchlist::reconcile(&decl, active.iter());
    assert_eq!(delta.to_remove, BTreeSet::from([p]));
}

#[test]
fn malformed_watchlist_is_reported_not_overwritten() {
    let home = assert_fs::TempDir::new().expect("home");
    let target = assert_fs::TempDir::new().expect("target");
    store::ensure_state_root_at(home.path()).expect("root");
    let file = home.child(".config/pusher/watchlist.json");
    file.write_str("[broken").expect("write");

    let err = watchlist::watch_at(home.path(), &[target.path()]).unwrap_err();
    assert!(err.to_string().contains("watchlist.json"), "got: {err}");
    file.assert("[broken");
}
