mod support;

use std::time::Duration;

use mooring_core::MountState;
use mooring_sync::{MountController, MountError, MountProber, MountTarget, RunLog};

use support::{configured, fakes, position, Script, PROBE, UNMOUNT};

fn target() -> MountTarget {
    MountTarget::from_config(&configured()).expect("configured target")
}

#[tokio::test(start_paused = true)]
async fn healthy_mount_is_accepted_without_mounting() {
    let (supervisor, mounter) = fakes();
    supervisor.on(PROBE, Script::stdout("fuse.s3fs\n"));

    let controller = MountController::new(&supervisor, &mounter, target());
    let mut log = RunLog::new();

    assert!(controller.ensure_mounted(&mut log).await);
    assert_eq!(mounter.calls(), 0);
    assert!(supervisor.started_matching(UNMOUNT).is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_path_is_mounted_with_endpoint() {
    let (supervisor, mounter) = fakes();
    supervisor.on(PROBE, Script::stdout("__NO_FS__\n"));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 1);
    assert_eq!(
        mounter.last_endpoint().as_deref(),
        Some("https://acct123.r2.cloudflarestorage.com")
    );
}

#[tokio::test(start_paused = true)]
async fn unresponsive_mount_is_unmounted_before_mounting() {
    let (supervisor, mounter) = fakes();
    supervisor
        .once(PROBE, Script::hang())
        .on(PROBE, Script::stdout("__NO_FS__\n"));

    let controller = MountController::new(&supervisor, &mounter, target());
    let mut log = RunLog::new();
    assert!(controller.ensure_mounted(&mut log).await);

    let timeline = supervisor.timeline();
    let unmount = position(&timeline, UNMOUNT).expect("unmount attempted");
    let mount = position(&timeline, "mount: moltbot-data").expect("mount attempted");
    assert!(unmount < mount, "unmount must precede mount");

    let hung = supervisor.handles_matching(PROBE);
    assert!(hung[0].was_killed(), "timed-out probe is killed");
    assert_eq!(supervisor.started_matching(PROBE).len(), 2, "re-probed after recovery");
    assert!(log.event_names().contains(&"unmount_attempt"));
}

#[tokio::test(start_paused = true)]
async fn recovery_that_revives_the_mount_skips_mounting() {
    let (supervisor, mounter) = fakes();
    supervisor
        .once(PROBE, Script::hang())
        .on(PROBE, Script::stdout("fuse.s3fs\n"));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn mount_path_that_keeps_hanging_is_never_mounted() {
    let (supervisor, mounter) = fakes();
    supervisor.on(PROBE, Script::hang());

    let controller = MountController::new(&supervisor, &mounter, target());
    let mut log = RunLog::new();
    assert!(!controller.ensure_mounted(&mut log).await);

    assert_eq!(mounter.calls(), 0, "a hung path must not reach the mount call");
    assert_eq!(supervisor.started_matching(PROBE).len(), 2);
    assert_eq!(supervisor.started_matching(UNMOUNT).len(), 1);
    assert!(!log.event_names().contains(&"mount_attempt"));
}

#[tokio::test(start_paused = true)]
async fn failing_unmount_variant_falls_through_to_next() {
    let (supervisor, mounter) = fakes();
    supervisor
        .once(PROBE, Script::hang())
        .on(PROBE, Script::stdout("__NO_FS__\n"))
        .on(UNMOUNT, Script::exit(32));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(supervisor.started_matching("fusermount -uz").len(), 1);
    assert!(supervisor.started_matching("fusermount3").is_empty());
}

#[tokio::test(start_paused = true)]
async fn path_in_use_with_live_mount_is_success() {
    let (supervisor, mounter) = fakes();
    supervisor
        .once(PROBE, Script::stdout("__NO_FS__\n"))
        .on(PROBE, Script::stdout("fuse.s3fs\n"));
    mounter.then(Err(MountError::PathInUse("already in use".into())));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn path_in_use_with_hung_mount_retries_exactly_once() {
    let (supervisor, mounter) = fakes();
    supervisor
        .once(PROBE, Script::stdout("__NO_FS__\n"))
        .on(PROBE, Script::hang());
    mounter
        .then(Err(MountError::PathInUse("busy".into())))
        .then(Err(MountError::PathInUse("busy".into())));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(!controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 2);
    assert_eq!(supervisor.started_matching(UNMOUNT).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn path_held_by_other_filesystem_fails() {
    let (supervisor, mounter) = fakes();
    supervisor.on(PROBE, Script::stdout("ext2/ext3\n"));
    mounter.then(Err(MountError::PathInUse("mountpoint is not empty".into())));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(!controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn plain_mount_failure_is_not_retried() {
    let (supervisor, mounter) = fakes();
    supervisor.on(PROBE, Script::stdout("__NO_FS__\n"));
    mounter.then(Err(MountError::Failed("bad credentials".into())));

    let controller = MountController::new(&supervisor, &mounter, target());
    assert!(!controller.ensure_mounted(&mut RunLog::new()).await);
    assert_eq!(mounter.calls(), 1);
    assert_eq!(supervisor.started_matching(PROBE).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn probe_waits_for_lagging_output() {
    let (supervisor, _mounter) = fakes();
    supervisor.on(PROBE, Script::stdout("fuse.s3fs\n").with_log_lag(2));

    let prober = MountProber::new(&supervisor, &configured().mount_path);
    assert_eq!(
        prober.probe().await,
        MountState::Mounted {
            fs_type: "fuse.s3fs".into()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn probe_timeout_is_unresponsive_after_budget() {
    let (supervisor, _mounter) = fakes();
    supervisor.on(PROBE, Script::hang());

    let prober = MountProber::new(&supervisor, &configured().mount_path)
        .with_timeout(Duration::from_secs(3));
    let started = tokio::time::Instant::now();
    assert_eq!(prober.probe().await, MountState::Unresponsive);
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn fs_type_query_that_cannot_start_is_unresponsive() {
    let (supervisor, _mounter) = fakes();
    supervisor.refuse(PROBE);

    let prober = MountProber::new(&supervisor, &configured().mount_path);
    assert_eq!(prober.probe().await, MountState::Unresponsive);
    assert!(prober.try_probe().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn offline_supervisor_never_reaches_the_mount_call() {
    let (supervisor, mounter) = fakes();
    supervisor.refuse(PROBE);

    let controller = MountController::new(&supervisor, &mounter, target());
    let mut log = RunLog::new();
    assert!(!controller.ensure_mounted(&mut log).await);
    assert_eq!(mounter.calls(), 0);

    let probes: Vec<_> = log.events().filter(|e| e.event == "mount_probe").collect();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].data["state"], "unresponsive");
    assert!(probes[0].data["error"]
        .as_str()
        .is_some_and(|error| error.contains("supervisor offline")));
}
