use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use queuectl_domain::entities::{Job, JobState};
use queuectl_domain::repositories::JobRepository;
use queuectl_domain::value_objects::{FailureTransition, RetryPolicy};
use queuectl_errors::{QueueError, QueueResult};
use tracing::{debug, error, info, warn};

use crate::executors::{ExecutionOutcome, JobExecutor};

/// 单个任务的执行、状态迁移与持久化
pub struct JobExecutionManager {
    worker_id: String,
    repository: Arc<dyn JobRepository>,
    executor: Arc<dyn JobExecutor>,
    retry_policy: RetryPolicy,
}

impl JobExecutionManager {
    pub fn new(
        worker_id: String,
        repository: Arc<dyn JobRepository>,
        executor: Arc<dyn JobExecutor>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            worker_id,
            repository,
            executor,
            retry_policy,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// 处理已领取的任务，返回迁移后的状态。
    /// 无论执行、持久化是否出错或发生panic，最后都会释放租约。
    pub async fn process(&self, job: Job) -> QueueResult<JobState> {
        let job_id = job.id.clone();

        let result = AssertUnwindSafe(self.execute_and_transition(job))
            .catch_unwind()
            .await;

        if let Err(e) = self.repository.release(&job_id).await {
            error!("Worker {} 释放任务 '{}' 的租约失败: {}", self.worker_id, job_id, e);
        }

        match result {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Worker {} 处理任务 '{}' 时发生panic: {}", self.worker_id, job_id, message);
                Err(QueueError::Internal(format!(
                    "处理任务 '{job_id}' 时发生panic: {message}"
                )))
            }
        }
    }

    async fn execute_and_transition(&self, mut job: Job) -> QueueResult<JobState> {
        info!(
            "Worker {} 开始处理任务 '{}' (尝试 {}/{})",
            self.worker_id,
            job.id,
            job.attempts + 1,
            job.max_retries
        );

        let outcome = self.executor.execute(&job).await;
        let now = Utc::now();

        match outcome {
            ExecutionOutcome::Success { stdout } => {
                job.record_success(now);
                info!("任务 '{}' 执行成功", job.id);
                if !stdout.is_empty() {
                    debug!("任务 '{}' 输出: {}", job.id, stdout);
                }
            }
            ExecutionOutcome::Failure { reason } => {
                match job.record_failure(reason.as_str(), &self.retry_policy, now) {
                    FailureTransition::Retry { attempt, delay, .. } => {
                        warn!(
                            "任务 '{}' 执行失败 (第 {}/{} 次)，{} 秒后重试: {}",
                            job.id,
                            attempt,
                            job.max_retries,
                            delay.num_seconds(),
                            reason
                        );
                    }
                    FailureTransition::Dead { attempts } => {
                        error!(
                            "任务 '{}' 在 {} 次尝试后移入死信队列: {}",
                            job.id, attempts, reason
                        );
                    }
                }
            }
        }

        if !self.repository.update(&job).await? {
            warn!("任务 '{}' 在持久化前已不存在，结果被丢弃", job.id);
        }

        Ok(job.state)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知panic".to_string()
    }
}
