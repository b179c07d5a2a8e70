use std::sync::Arc;

use anyhow::{Context, Result};
use queuectl_config::AppConfig;
use queuectl_domain::{Job, JobRepository, JobStats, JobSubmission, QueueService, RetryPolicy};
use queuectl_infrastructure::{DatabaseManager, SqliteJobRepository};
use queuectl_worker::{JobExecutionManager, ShellExecutor, WorkerLifecycle, WorkerPool};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// 队列状态：各状态任务数与存活的Worker进程
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub stats: JobStats,
    pub active_workers: Vec<i32>,
}

/// 主应用程序，持有数据库连接与队列服务
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    repository: Arc<dyn JobRepository>,
    queue: QueueService,
}

impl Application {
    /// 打开数据库（不存在时创建并建表）并装配队列服务
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("打开数据库失败: {}", config.database.path))?;

        let repository: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(
            database.pool().clone(),
            config.worker.lease_timeout(),
        ));

        let default_max_retries =
            i32::try_from(config.queue.max_retries).context("max_retries 超出取值范围")?;
        let queue = QueueService::new(Arc::clone(&repository), default_max_retries);

        debug!("应用程序初始化完成, 数据库: {}", config.database.path);
        Ok(Self {
            config,
            database,
            repository,
            queue,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &QueueService {
        &self.queue
    }

    /// 解析 `{"id", "command", "max_retries"?}` 并提交
    pub async fn enqueue(&self, job_json: &str) -> Result<Job> {
        let submission: JobSubmission =
            serde_json::from_str(job_json).context("无效的任务JSON")?;
        Ok(self.queue.submit(submission).await?)
    }

    pub async fn status(&self) -> Result<QueueStatus> {
        let stats = self.queue.stats().await?;
        let active_workers = worker_pool(&self.config)
            .active_workers()
            .context("读取Worker清单失败")?;

        Ok(QueueStatus {
            stats,
            active_workers,
        })
    }

    /// 在当前进程中运行一个Worker，直到收到关闭信号。返回处理的任务数
    pub async fn run_worker(&self, worker_id: &str, shutdown_rx: broadcast::Receiver<()>) -> usize {
        let executor = Arc::new(ShellExecutor::new(self.config.worker.execution_timeout()));
        let execution = Arc::new(JobExecutionManager::new(
            worker_id.to_string(),
            Arc::clone(&self.repository),
            executor,
            RetryPolicy::new(self.config.queue.backoff_base),
        ));
        let lifecycle = WorkerLifecycle::new(
            worker_id.to_string(),
            Arc::clone(&self.repository),
            execution,
            self.config.worker.check_interval(),
        );

        info!(
            "Worker {} 启动 (PID {}), 轮询间隔 {:?}",
            worker_id,
            std::process::id(),
            self.config.worker.check_interval()
        );
        let processed = lifecycle.run(shutdown_rx).await;
        info!("Worker {} 已退出, 共处理 {} 个任务", worker_id, processed);
        processed
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}

/// 按配置构造Worker进程池，不需要打开数据库
pub fn worker_pool(config: &AppConfig) -> WorkerPool {
    WorkerPool::new(&config.worker.manifest_path, config.worker.shutdown_grace())
}
