use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use queuectl_domain::repositories::JobRepository;
use queuectl_errors::QueueResult;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{error, info};

use super::JobExecutionManager;

/// Worker主循环：领取、执行、迁移、释放，空闲时按轮询间隔休眠。
/// 停止信号只在两个任务之间检查，正在执行的命令不会被打断。
pub struct WorkerLifecycle {
    worker_id: String,
    repository: Arc<dyn JobRepository>,
    execution: Arc<JobExecutionManager>,
    poll_interval: Duration,
}

impl WorkerLifecycle {
    pub fn new(
        worker_id: String,
        repository: Arc<dyn JobRepository>,
        execution: Arc<JobExecutionManager>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            worker_id,
            repository,
            execution,
            poll_interval,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 领取并处理一个任务，返回是否领取到任务
    pub async fn poll_once(&self) -> QueueResult<bool> {
        let Some(job) = self.repository.claim(&self.worker_id, Utc::now()).await? else {
            return Ok(false);
        };

        if let Err(e) = self.execution.process(job).await {
            error!("Worker {} 处理任务出错: {}", self.worker_id, e);
        }
        Ok(true)
    }

    /// 运行直到收到停止信号，返回处理过的任务数
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> usize {
        info!("Worker {} 已启动，轮询间隔 {:?}", self.worker_id, self.poll_interval);
        let mut processed = 0;

        loop {
            if stop_requested(&mut shutdown_rx) {
                break;
            }

            match self.poll_once().await {
                Ok(true) => {
                    processed += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Worker {} 领取任务失败: {}", self.worker_id, e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!("Worker {} 已停止，共处理 {} 个任务", self.worker_id, processed);
        processed
    }
}

fn stop_requested(shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty))
}
