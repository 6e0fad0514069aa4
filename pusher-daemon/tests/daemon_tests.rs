use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pusher_core::{queue, store, watchlist, CanonicalPath, Config, Settings};
use pusher_daemon::{request_status_with_retries, request_stop, run_with_uploader};
use pusher_upload::{RemoteId, UploadError, Uploader};
use serde_json::Value;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingUploader {
    reject: AtomicBool,
    uploads: Mutex<Vec<PathBuf>>,
}

impl Uploader for RecordingUploader {
    fn create(&self, local: &Path, _parent_id: &str) -> Result<RemoteId, UploadError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(UploadError::Transport("offline".to_string()));
        }
        self.uploads.lock().unwrap().push(local.to_path_buf());
        Ok(RemoteId::from("remote"))
    }

    fn create_container(&self, _name: &str) -> Result<RemoteId, UploadError> {
        Ok(RemoteId::from("created-folder"))
    }

    fn find_container(&self, _name: &str) -> Result<Option<RemoteId>, UploadError> {
        Ok(Some(RemoteId::from("found-folder")))
    }
}

async fn status(home: &Path) -> Value {
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || request_status_with_retries(&home, 100))
        .await
        .expect("join")
        .expect("daemon status")
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..150 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("daemon did not reach the expected state in time");
}

fn subscribed(payload: &Value, dir: &CanonicalPath) -> bool {
    payload["subscriptions"]
        .as_array()
        .map(|subs| subs.iter().any(|s| s.as_str() == Some(&dir.to_string())))
        .unwrap_or(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn daemon_uploads_new_files_and_follows_the_watchlist() {
    let home = TempDir::new().expect("home");
    let watched = TempDir::new().expect("watched");
    let dir = CanonicalPath::resolve(watched.path()).expect("resolve");
    watchlist::watch_at(home.path(), &[watched.path()]).expect("watch");

    let uploader = Arc::new(RecordingUploader::default());
    let daemon = tokio::spawn(run_with_uploader(
        home.path().to_path_buf(),
        Settings::default(),
        uploader.clone() as Arc<dyn Uploader>,
    ));

    wait_until(|| {
        let home = home.path().to_path_buf();
        let dir = dir.clone();
        async move { subscribed(&status(&home).await, &dir) }
    })
    .await;
    assert_eq!(
        store::load_at::<Config>(home.path()).expect("config").folder_id,
        "found-folder"
    );

    let file = watched.path().join("scan.pdf");
    fs::write(&file, "pages").expect("write");
    wait_until(|| {
        let file = file.clone();
        async move { !file.exists() }
    })
    .await;
    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);

    watchlist::exclude_at(home.path(), &[watched.path()]).expect("exclude");
    wait_until(|| {
        let home = home.path().to_path_buf();
        let dir = dir.clone();
        async move { !subscribed(&status(&home).await, &dir) }
    })
    .await;

    let late = watched.path().join("late.pdf");
    fs::write(&late, "more pages").expect("write");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(uploader.uploads.lock().unwrap().len(), 1);
    assert!(late.exists());

    let stop_home = home.path().to_path_buf();
    tokio::task::spawn_blocking(move || request_stop(&stop_home))
        .await
        .expect("join")
        .expect("stop");
    daemon.await.expect("join").expect("daemon exits cleanly");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_upload_lands_in_the_queue() {
    let home = TempDir::new().expect("home");
    let watched = TempDir::new().expect("watched");
    let dir = CanonicalPath::resolve(watched.path()).expect("resolve");
    watchlist::watch_at(home.path(), &[watched.path()]).expect("watch");

    let uploader = Arc::new(RecordingUploader::default());
    uploader.reject.store(true, Ordering::SeqCst);
    let daemon = tokio::spawn(run_with_uploader(
        home.path().to_path_buf(),
        Settings::default(),
        uploader.clone() as Arc<dyn Uploader>,
    ));
    wait_until(|| {
        let home = home.path().to_path_buf();
        let dir = dir.clone();
        async move { subscribed(&status(&home).await, &dir) }
    })
    .await;

    let file = watched.path().join("notes.txt");
    fs::write(&file, "draft").expect("write");
    let expected = CanonicalPath::resolve(&file).expect("resolve");
    wait_until(|| {
        let home = home.path().to_path_buf();
        let expected = expected.clone();
        async move {
            queue::load_at(&home)
                .map(|q| q.to_do.contains(&expected))
                .unwrap_or(false)
        }
    })
    .await;
    assert!(file.exists());

    wait_until(|| {
        let home = home.path().to_path_buf();
        async move { status(&home).await["queued"] == serde_json::json!(1) }
    })
    .await;

    let stop_home = home.path().to_path_buf();
    tokio::task::spawn_blocking(move || request_stop(&stop_home))
        .await
        .expect("join")
        .expect("stop");
    daemon.await.expect("join").expect("daemon exits cleanly");
}
