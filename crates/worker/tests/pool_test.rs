use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use queuectl_domain::QueueError;
use queuectl_worker::pool::is_alive;
use queuectl_worker::{
    ExecutableLauncher, SupervisionOutcome, WorkerEntry, WorkerLauncher, WorkerManifest, WorkerPool,
};
use tokio::sync::broadcast;

fn sleeper(_worker_id: &str) -> Command {
    let mut command = Command::new("sleep");
    command.arg("30");
    command
}

fn term_ignoring(_worker_id: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg("trap '' TERM; exec sleep 30");
    command
}

fn quick_exit(_worker_id: &str) -> Command {
    Command::new("true")
}

#[tokio::test]
async fn test_start_writes_manifest_and_stop_terminates_workers() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");
    let mut pool = WorkerPool::new(&manifest_path, Duration::from_secs(5));

    let manifest = pool.start(2, &sleeper)?;
    assert_eq!(
        manifest
            .workers
            .iter()
            .map(|w| w.worker_id.as_str())
            .collect::<Vec<_>>(),
        vec!["worker-1", "worker-2"]
    );
    assert_eq!(WorkerManifest::load(&manifest_path)?, Some(manifest.clone()));

    let mut active = pool.active_workers()?;
    active.sort();
    let mut expected = manifest.pids();
    expected.sort();
    assert_eq!(active, expected);

    let report = pool.stop().await?;
    assert_eq!(report.signaled.len(), 2);
    assert!(report.killed.is_empty());
    assert!(!manifest_path.exists());
    assert!(manifest.pids().iter().all(|pid| !is_alive(*pid)));
    assert!(pool.active_workers()?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_refuses_to_start_while_pool_is_live() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");

    let mut running = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    let manifest = running.start(1, &sleeper)?;

    let mut second = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    let error = second.start(1, &sleeper).unwrap_err();
    match error {
        QueueError::PoolAlreadyRunning { pids } => assert_eq!(pids, manifest.pids()),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(second.owned_workers().is_empty());

    running.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_from_another_controller_uses_manifest() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");

    let mut controller = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    let manifest = controller.start(2, &sleeper)?;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let supervisor = tokio::spawn(async move { controller.supervise(shutdown_rx).await });

    let mut stopper = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    let report = stopper.stop().await?;
    let mut signaled = report.signaled.clone();
    signaled.sort();
    let mut expected = manifest.pids();
    expected.sort();
    assert_eq!(signaled, expected);

    let outcome = tokio::time::timeout(Duration::from_secs(5), supervisor).await???;
    assert_eq!(outcome, SupervisionOutcome::AllExited);
    assert!(!manifest_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_stragglers_are_killed_after_grace_period() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");
    let mut pool = WorkerPool::new(&manifest_path, Duration::from_millis(300));

    let manifest = pool.start(1, &term_ignoring)?;
    // 等待 trap 生效
    tokio::time::sleep(Duration::from_millis(300)).await;

    let report = pool.stop().await?;
    assert_eq!(report.signaled, manifest.pids());
    assert_eq!(report.killed, manifest.pids());
    assert!(!is_alive(manifest.pids()[0]));
    assert!(!manifest_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_supervise_stops_pool_on_shutdown_signal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");
    let mut pool = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    pool.start(2, &sleeper)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let supervisor = tokio::spawn(async move { pool.supervise(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(())?;

    let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor).await???;
    match outcome {
        SupervisionOutcome::Stopped(report) => {
            assert_eq!(report.signaled.len(), 2);
            assert!(report.killed.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!manifest_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_supervise_returns_when_workers_exit_on_their_own() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");
    let mut pool = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    pool.start(3, &quick_exit)?;

    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let outcome = tokio::time::timeout(Duration::from_secs(5), pool.supervise(shutdown_rx)).await??;

    assert_eq!(outcome, SupervisionOutcome::AllExited);
    assert!(!manifest_path.exists());
    Ok(())
}

#[tokio::test]
async fn test_stale_manifest_is_cleaned_up() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");

    let mut exited = Command::new("true").spawn()?;
    let dead_pid = exited.id() as i32;
    exited.wait()?;

    WorkerManifest::new(vec![WorkerEntry {
        worker_id: "worker-1".to_string(),
        pid: dead_pid,
    }])
    .save(&manifest_path)?;

    let mut pool = WorkerPool::new(&manifest_path, Duration::from_secs(5));
    assert!(pool.active_workers()?.is_empty());
    assert!(!manifest_path.exists());

    pool.start(1, &sleeper)?;
    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_start_requests() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let manifest_path = dir.path().join("workers.pid");
    let mut pool = WorkerPool::new(&manifest_path, Duration::from_secs(1));

    assert!(matches!(
        pool.start(0, &sleeper),
        Err(QueueError::ValidationError(_))
    ));

    let missing = |_: &str| Command::new("/nonexistent/queuectl-worker");
    assert!(matches!(pool.start(2, &missing), Err(QueueError::Process(_))));
    assert!(!manifest_path.exists());
    assert!(pool.owned_workers().is_empty());
    Ok(())
}

#[test]
fn test_executable_launcher_appends_worker_id() {
    let launcher = ExecutableLauncher::new("/usr/local/bin/queuectl")
        .arg("--config")
        .arg("queuectl.toml")
        .arg("worker")
        .arg("run");
    let command = launcher.command("worker-3");

    assert_eq!(command.get_program(), "/usr/local/bin/queuectl");
    let args: Vec<_> = command
        .get_args()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect();
    assert_eq!(
        args,
        vec!["--config", "queuectl.toml", "worker", "run", "--id", "worker-3"]
    );
}
