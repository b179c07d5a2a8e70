//! # 领域服务模块
//!
//! 面向提交与查询的队列服务：提交任务、列出任务、统计各状态数量，
//! 以及死信队列（DLQ）的查看与重新入队。任务的执行与状态迁移由 Worker 完成。

use std::sync::Arc;

use chrono::Utc;
use queuectl_errors::{QueueError, QueueResult};
use tracing::{info, instrument, warn};

use crate::entities::{Job, JobState, JobStats, JobSubmission};
use crate::repositories::JobRepository;

pub struct QueueService {
    repository: Arc<dyn JobRepository>,
    default_max_retries: i32,
}

impl QueueService {
    pub fn new(repository: Arc<dyn JobRepository>, default_max_retries: i32) -> Self {
        Self {
            repository,
            default_max_retries,
        }
    }

    #[instrument(skip(self, submission), fields(job_id = %submission.id))]
    pub async fn submit(&self, submission: JobSubmission) -> QueueResult<Job> {
        let job = submission.into_job(self.default_max_retries, Utc::now())?;

        match self.repository.insert(&job).await {
            Ok(()) => {
                info!("任务 '{}' 已入队, max_retries={}", job.id, job.max_retries);
                Ok(job)
            }
            Err(e @ QueueError::DuplicateId { .. }) => {
                warn!("任务 '{}' 已存在，拒绝重复提交", job.id);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, id: &str) -> QueueResult<Job> {
        self.repository.fetch(id).await
    }

    pub async fn list(&self, state: Option<JobState>) -> QueueResult<Vec<Job>> {
        self.repository.list(state).await
    }

    pub async fn stats(&self) -> QueueResult<JobStats> {
        self.repository.stats().await
    }

    pub async fn dead_letter_jobs(&self) -> QueueResult<Vec<Job>> {
        self.repository.list(Some(JobState::Dead)).await
    }

    /// 将死信任务重新放回待执行队列
    #[instrument(skip(self))]
    pub async fn retry_dead(&self, id: &str) -> QueueResult<Job> {
        let job = self.repository.reset_dead(id, Utc::now()).await?;
        info!("任务 '{}' 已从死信队列移回待执行队列", job.id);
        Ok(job)
    }
}
