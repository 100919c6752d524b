use std::path::PathBuf;
use std::time::Duration;

use mooring_core::Config;
use mooring_daemon::paths::socket_path;
use mooring_daemon::{request_status, request_stop, request_sync, run_with, SyncBackends};
use tempfile::TempDir;

async fn blocking<T, F>(home: PathBuf, call: F) -> T
where
    T: Send + 'static,
    F: FnOnce(PathBuf) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || call(home))
        .await
        .expect("blocking client call")
}

async fn wait_for_socket(home: &TempDir) {
    let socket = socket_path(home.path());
    for _ in 0..100 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_sync_and_stop_over_the_socket() {
    let home = TempDir::new().expect("home");
    // Unconfigured storage: every run fails at the gate without touching
    // processes or mounts.
    let config = Config {
        sync_interval_secs: 0,
        ..Config::default()
    };

    let daemon = tokio::spawn(run_with(
        home.path().to_path_buf(),
        config,
        SyncBackends::local(),
    ));
    wait_for_socket(&home).await;

    let status = blocking(home.path().to_path_buf(), |h| request_status(&h))
        .await
        .expect("status");
    assert_eq!(status["running"], true);
    assert_eq!(status["runs"], 0);
    assert_eq!(status["configured"], false);

    let result = blocking(home.path().to_path_buf(), |h| request_sync(&h))
        .await
        .expect("sync");
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("R2 storage is not configured"));

    let status = blocking(home.path().to_path_buf(), |h| request_status(&h))
        .await
        .expect("status after sync");
    assert_eq!(status["runs"], 1);
    assert_eq!(status["last_result"]["success"], false);

    blocking(home.path().to_path_buf(), |h| request_stop(&h))
        .await
        .expect("stop");
    tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon exits after stop")
        .expect("join")
        .expect("clean shutdown");
    assert!(!socket_path(home.path()).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_daemon_refuses_a_live_socket() {
    let home = TempDir::new().expect("home");
    let config = Config {
        sync_interval_secs: 0,
        ..Config::default()
    };

    let first = tokio::spawn(run_with(
        home.path().to_path_buf(),
        config.clone(),
        SyncBackends::local(),
    ));
    wait_for_socket(&home).await;

    let second = run_with(home.path().to_path_buf(), config, SyncBackends::local()).await;
    assert!(second.is_err(), "second daemon must not steal the socket");

    blocking(home.path().to_path_buf(), |h| request_stop(&h))
        .await
        .expect("stop");
    let _ = tokio::time::timeout(Duration::from_secs(5), first).await;
}
