//! 领域仓储抽象
//!
//! 任务记录存储的原子操作接口。领取（claim）通过行上的租约字段做比较并交换，
//! 不依赖额外的锁服务。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_errors::QueueResult;

use crate::entities::{Job, JobState, JobStats, Lease};

/// 任务仓储抽象
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// 插入新任务，ID已存在时返回 `DuplicateId` 且不修改原记录
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    /// 按ID获取任务，不存在时返回 `NotFound`
    async fn fetch(&self, id: &str) -> QueueResult<Job>;

    /// 领取最早创建的可执行任务并标记为 processing；没有可领取的任务时返回 `None`
    async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>>;

    /// 持久化任务的可变字段，返回是否有记录被更新
    async fn update(&self, job: &Job) -> QueueResult<bool>;

    /// 无条件清除租约
    async fn release(&self, id: &str) -> QueueResult<()>;

    /// 按创建时间倒序列出任务
    async fn list(&self, state: Option<JobState>) -> QueueResult<Vec<Job>>;

    async fn stats(&self) -> QueueResult<JobStats>;

    /// 将 dead 任务重置为 pending，attempts 归零
    async fn reset_dead(&self, id: &str, now: DateTime<Utc>) -> QueueResult<Job>;

    /// 当前租约持有者
    async fn lease(&self, id: &str) -> QueueResult<Option<Lease>>;
}
