//! Watcher tests against real files.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cyclic_file_watcher::config::WatcherConfig;
use cyclic_file_watcher::watcher::{
    BoxError, FileProbe, FileWatcher, FsProbe, WatchError, WatchParameters,
};
use tokio_util::sync::CancellationToken;

use super::{eventually, Recorder};

fn write_version(path: &Path, content: &str, age_secs: u64) {
    fs::write(path, content).unwrap();
    let modified = SystemTime::now() - Duration::from_secs(age_secs);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

fn params(path: &Path, depth: usize) -> WatchParameters<String> {
    WatchParameters::new(
        path,
        depth,
        |path: PathBuf| async move { tokio::fs::read_to_string(path).await },
        |_: &Path, content: &String| Ok::<_, BoxError>(content.trim().to_string()),
    )
}

fn watcher() -> FileWatcher<String> {
    let config = WatcherConfig::new(Duration::from_millis(10))
        .with_open_retry_delay(Duration::from_millis(5))
        .with_hooks(Arc::new(Recorder::default()));
    FileWatcher::new(config)
}

#[tokio::test]
async fn test_real_file_versions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.txt");
    write_version(&path, "alpha\n", 30);

    let watcher = watcher();
    let cancel = CancellationToken::new();
    watcher.watch(params(&path, 2), &cancel).await.unwrap();
    assert_eq!(watcher.get_latest(&path, &cancel).await.unwrap().key(), "alpha");

    write_version(&path, "beta\n", 20);
    eventually("beta", || async {
        watcher.get_latest(&path, &cancel).await.unwrap().key() == "beta"
    })
    .await;

    write_version(&path, "gamma\n", 10);
    eventually("gamma", || async {
        watcher.get_latest(&path, &cancel).await.unwrap().key() == "gamma"
    })
    .await;

    assert!(watcher.get(&path, "alpha", &cancel).await.is_err());
    assert_eq!(
        watcher.get(&path, "beta", &cancel).await.unwrap().content(),
        "beta\n"
    );

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_watch_nonexistent_file() {
    let dir = tempfile::tempdir().unwrap();
    let watcher = watcher();
    let err = watcher
        .watch(params(&dir.path().join("missing"), 2), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_empty_file_waits_for_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.txt");
    write_version(&path, "first\n", 30);

    let watcher = watcher();
    let cancel = CancellationToken::new();
    watcher.watch(params(&path, 3), &cancel).await.unwrap();
    watcher.get_latest(&path, &cancel).await.unwrap();

    // A truncated file looks like a write in progress.
    write_version(&path, "", 20);
    assert!(!FsProbe::new().can_open_exclusively(&path));
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The reload holds the file's lock while it waits, so readers wait too.
    let read_cancel = CancellationToken::new();
    let trigger = read_cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });
    assert!(matches!(
        watcher.keys(&path, &read_cancel).await,
        Err(WatchError::Cancelled)
    ));

    write_version(&path, "second\n", 10);
    eventually("second", || async {
        watcher
            .get_latest(&path, &CancellationToken::new())
            .await
            .is_ok_and(|s| s.key() == "second")
    })
    .await;

    watcher.shutdown().await;
}
