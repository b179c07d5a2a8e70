use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use queuectl::shutdown::ShutdownManager;
use queuectl::Application;
use queuectl_config::AppConfig;
use queuectl_domain::{JobState, QueueError};
use tempfile::TempDir;
use tracing_test::traced_test;

fn test_config(dir: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.path = dir.join("jobs.db").to_string_lossy().to_string();
    config.worker.manifest_path = dir.join("workers.pid").to_string_lossy().to_string();
    config.worker.check_interval_seconds = 1;
    config.worker.execution_timeout_seconds = 10;
    config
}

async fn wait_for_state(app: &Application, id: &str, state: JobState) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if app.queue().get(id).await?.state == state {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("任务 '{id}' 未在规定时间内进入 {state} 状态");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
#[traced_test]
async fn test_enqueue_and_reject_duplicate() -> Result<()> {
    let dir = TempDir::new()?;
    let app = Application::new(test_config(dir.path())).await?;

    let job = app.enqueue(r#"{"id":"a","command":"echo hello"}"#).await?;
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.attempts, 0);

    let error = app
        .enqueue(r#"{"id":"a","command":"echo other"}"#)
        .await
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<QueueError>(),
        Some(QueueError::DuplicateId { id }) if id == "a"
    ));
    assert_eq!(app.queue().get("a").await?.command, "echo hello");
    assert!(logs_contain("拒绝重复提交"));

    app.close().await;
    Ok(())
}

#[tokio::test]
async fn test_enqueue_rejects_malformed_submissions() -> Result<()> {
    let dir = TempDir::new()?;
    let app = Application::new(test_config(dir.path())).await?;

    assert!(app.enqueue("not json").await.is_err());
    assert!(app.enqueue(r#"{"id":"a"}"#).await.is_err());

    let error = app
        .enqueue(r#"{"id":"a","command":"true","max_retries":0}"#)
        .await
        .unwrap_err();
    assert!(matches!(
        error.downcast_ref::<QueueError>(),
        Some(QueueError::ValidationError(_))
    ));

    assert_eq!(app.queue().stats().await?.total(), 0);
    Ok(())
}

#[tokio::test]
async fn test_configured_default_max_retries() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = test_config(dir.path());
    config.queue.max_retries = 5;
    let app = Application::new(config).await?;

    assert_eq!(app.enqueue(r#"{"id":"a","command":"true"}"#).await?.max_retries, 5);
    assert_eq!(
        app.enqueue(r#"{"id":"b","command":"true","max_retries":1}"#)
            .await?
            .max_retries,
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_status_reports_counts_and_no_workers() -> Result<()> {
    let dir = TempDir::new()?;
    let app = Application::new(test_config(dir.path())).await?;
    app.enqueue(r#"{"id":"a","command":"true"}"#).await?;
    app.enqueue(r#"{"id":"b","command":"true"}"#).await?;

    let status = app.status().await?;
    assert_eq!(status.stats.pending, 2);
    assert_eq!(status.stats.total(), 2);
    assert!(status.active_workers.is_empty());
    Ok(())
}

#[tokio::test]
#[traced_test]
async fn test_worker_runs_jobs_and_dead_letter_retry() -> Result<()> {
    let dir = TempDir::new()?;
    let app = Application::new(test_config(dir.path())).await?;
    app.enqueue(r#"{"id":"ok","command":"echo hello"}"#).await?;
    app.enqueue(r#"{"id":"bad","command":"exit 7","max_retries":1}"#)
        .await?;

    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;

    let worker = app.run_worker("worker-1", shutdown_rx);
    let observer = async {
        wait_for_state(&app, "ok", JobState::Completed).await?;
        wait_for_state(&app, "bad", JobState::Dead).await?;
        shutdown.shutdown().await;
        Ok::<_, anyhow::Error>(())
    };

    let (processed, observed) =
        tokio::time::timeout(Duration::from_secs(15), async { tokio::join!(worker, observer) })
            .await?;
    observed?;
    assert_eq!(processed, 2);

    let dead = app.queue().dead_letter_jobs().await?;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, "bad");
    assert_eq!(dead[0].last_error.as_deref(), Some("退出码 7"));

    let retried = app.queue().retry_dead("bad").await?;
    assert_eq!(retried.state, JobState::Pending);
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.last_error, None);
    assert!(app.queue().dead_letter_jobs().await?.is_empty());

    let error = app.queue().retry_dead("ok").await.unwrap_err();
    assert!(matches!(error, QueueError::InvalidState { .. }));
    assert!(logs_contain("已从死信队列移回待执行队列"));
    Ok(())
}

#[tokio::test]
async fn test_database_survives_reopen() -> Result<()> {
    let dir = TempDir::new()?;
    let config = test_config(dir.path());

    let app = Application::new(config.clone()).await?;
    app.enqueue(r#"{"id":"a","command":"true"}"#).await?;
    app.close().await;

    let reopened = Application::new(config).await?;
    assert_eq!(reopened.queue().get("a").await?.state, JobState::Pending);
    Ok(())
}
