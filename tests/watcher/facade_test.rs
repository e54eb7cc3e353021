//! End-to-end tests of the watcher facade against an in-memory filesystem.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cyclic_file_watcher::watcher::{BoxError, FileIdentifier, FileState, WatchError};
use tokio_util::sync::CancellationToken;

use super::{eventually, fake_watcher};

#[tokio::test]
async fn test_depth_two_keeps_two_latest_versions() {
    let (watcher, fs, _recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    fs.create("/srv/token");
    watcher.watch(fs.params("/srv/token", 2), &cancel).await.unwrap();
    assert_eq!(watcher.get_latest("/srv/token", &cancel).await.unwrap().key(), "k1");

    fs.modify("/srv/token");
    eventually("k2", || async {
        watcher.get_latest("/srv/token", &cancel).await.unwrap().key() == "k2"
    })
    .await;
    fs.modify("/srv/token");
    eventually("k3", || async {
        watcher.get_latest("/srv/token", &cancel).await.unwrap().key() == "k3"
    })
    .await;

    let err = watcher.get("/srv/token", "k1", &cancel).await.unwrap_err();
    assert!(matches!(err, WatchError::KeyNotFound { ref key, .. } if key == "k1"));
    assert_eq!(watcher.get("/srv/token", "k2", &cancel).await.unwrap().content(), "v2");
    assert_eq!(watcher.get("/srv/token", "k3", &cancel).await.unwrap().content(), "v3");
    assert_eq!(
        watcher.keys("/srv/token", &cancel).await.unwrap(),
        vec!["k2", "k3"]
    );

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_second_watch_keeps_history() {
    let (watcher, fs, _recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    fs.create("/a");
    watcher.watch(fs.params("/a", 3), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();
    fs.modify("/a");
    eventually("k2", || async {
        watcher.keys("/a", &cancel).await.unwrap().len() == 2
    })
    .await;

    assert!(!watcher.watch(fs.params("/a", 1), &cancel).await.unwrap());
    assert_eq!(watcher.keys("/a", &cancel).await.unwrap(), vec!["k1", "k2"]);
    assert_eq!(watcher.watched(), vec![FileIdentifier::new("/a")]);

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_latest_key_only_moves_forward() {
    let (watcher, fs, _recorder) = fake_watcher();
    let watcher = Arc::new(watcher);
    let cancel = CancellationToken::new();
    fs.create("/a");
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();

    let reader = {
        let watcher = Arc::clone(&watcher);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.last().map_or(true, |n| *n < 5) {
                let latest = watcher.get_latest("/a", &cancel).await.unwrap();
                let n: u32 = latest.key()[1..].parse().unwrap();
                seen.push(n);
                tokio::task::yield_now().await;
            }
            seen
        })
    };

    for version in 2..=5 {
        eventually("previous version", || async {
            watcher.keys("/a", &cancel).await.unwrap().last().map(String::as_str)
                == Some(format!("k{}", version - 1).as_str())
        })
        .await;
        fs.modify("/a");
    }

    let seen = tokio::time::timeout(Duration::from_secs(2), reader)
        .await
        .unwrap()
        .unwrap();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "keys went backwards: {seen:?}");
    assert_eq!(seen.last(), Some(&5));

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_failing_file_reported_once_per_tick_and_others_continue() {
    let (watcher, fs, recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    fs.create("/a");
    fs.create("/b");
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();
    watcher.watch(fs.params("/b", 2), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();
    watcher.get_latest("/b", &cancel).await.unwrap();

    fs.fail_reads("/a", true);
    fs.modify("/a");
    fs.modify("/b");

    eventually("b reloaded", || async {
        watcher.get_latest("/b", &cancel).await.unwrap().key() == "k2"
    })
    .await;
    eventually("a reported", || async {
        !recorder.reload_failures.lock().unwrap().is_empty()
    })
    .await;

    let failures = recorder.reload_failures.lock().unwrap().clone();
    assert!(failures.iter().all(|id| id == &FileIdentifier::new("/a")));
    assert!(!recorder.reloaded.lock().unwrap().contains(&FileIdentifier::new("/a")));
    assert_eq!(watcher.get_latest("/a", &cancel).await.unwrap().key(), "k1");

    fs.fail_reads("/a", false);
    eventually("a recovered", || async {
        watcher.get_latest("/a", &cancel).await.unwrap().key() == "k2"
    })
    .await;

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_unchanged_file_loaded_once() {
    let (watcher, fs, _recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fs.create("/a");

    let counter = Arc::clone(&calls);
    watcher
        .subscribe(
            "/a",
            move |_: Arc<FileState<String>>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            },
            &cancel,
        )
        .await
        .unwrap();
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();

    // Many poll intervals.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(fs.loads(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribed_callback_not_called_again() {
    let (watcher, fs, _recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fs.create("/a");
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();

    let counter = Arc::clone(&calls);
    let subscription = watcher
        .subscribe(
            "/a",
            move |_: Arc<FileState<String>>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            },
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(subscription.identifier(), &FileIdentifier::new("/a"));

    fs.modify("/a");
    eventually("first notification", || async { calls.load(Ordering::SeqCst) == 1 }).await;

    watcher.unsubscribe(&subscription, &cancel).await.unwrap();
    fs.modify("/a");
    eventually("k3", || async {
        watcher.get_latest("/a", &cancel).await.unwrap().key() == "k3"
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Unknown subscriptions are ignored.
    watcher.unsubscribe(&subscription, &cancel).await.unwrap();
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_failing_subscriber_reported_and_others_notified() {
    let (watcher, fs, recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    fs.create("/a");
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();

    watcher
        .subscribe(
            "/a",
            |_: Arc<FileState<String>>| async { Err::<(), BoxError>("subscriber down".into()) },
            &cancel,
        )
        .await
        .unwrap();
    let counter = Arc::clone(&calls);
    watcher
        .subscribe(
            "/a",
            move |_: Arc<FileState<String>>| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }
            },
            &cancel,
        )
        .await
        .unwrap();

    fs.modify("/a");
    eventually("failure reported", || async {
        recorder.subscribe_failures.lock().unwrap().len() == 1
    })
    .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    watcher.shutdown().await;
}

#[tokio::test]
async fn test_operations_fail_after_shutdown() {
    let (watcher, fs, _recorder) = fake_watcher();
    let cancel = CancellationToken::new();
    fs.create("/a");
    watcher.watch(fs.params("/a", 2), &cancel).await.unwrap();
    watcher.get_latest("/a", &cancel).await.unwrap();
    let loads = fs.loads();

    watcher.shutdown().await;
    fs.modify("/a");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(fs.loads(), loads);
    assert!(matches!(
        watcher.watch(fs.params("/a", 2), &cancel).await,
        Err(WatchError::Disposed)
    ));
    assert!(matches!(watcher.get("/a", "k1", &cancel).await, Err(WatchError::Disposed)));
    assert!(matches!(watcher.get_latest("/a", &cancel).await, Err(WatchError::Disposed)));
    assert!(matches!(
        watcher
            .subscribe(
                "/a",
                |_: Arc<FileState<String>>| async { Ok::<_, BoxError>(()) },
                &cancel
            )
            .await,
        Err(WatchError::Disposed)
    ));
}
