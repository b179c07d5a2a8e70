use chrono::{DateTime, Utc};
use queuectl_errors::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};

use crate::value_objects::{FailureTransition, RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: i32,
    pub max_retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// completed 与 dead 不会再被领取，dead 只能通过显式重置离开
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(QueueError::validation_error(format!(
                "无效的任务状态: {s}，支持的状态: pending, processing, completed, failed, dead"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            _ => Err(format!("Invalid job state: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl Job {
    pub fn new(id: String, command: String, max_retries: i32, now: DateTime<Utc>) -> Self {
        Self {
            id,
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries,
            created_at: now,
            updated_at: now,
            last_error: None,
            next_retry_at: None,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.state == JobState::Dead
    }

    /// 执行成功：attempts 保持不变
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Completed;
        self.last_error = None;
        self.next_retry_at = None;
        self.touch(now);
    }

    /// 执行失败后的状态迁移，在同一步内完成 failed 或 dead 的判定
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> FailureTransition {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.touch(now);

        if self.attempts >= self.max_retries {
            self.state = JobState::Dead;
            self.next_retry_at = None;
            return FailureTransition::Dead {
                attempts: self.attempts,
            };
        }

        let delay = policy.delay_for(self.attempts);
        let next_retry_at = now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state = JobState::Failed;
        self.next_retry_at = Some(next_retry_at);

        FailureTransition::Retry {
            attempt: self.attempts,
            delay,
            next_retry_at,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }

    pub fn entity_description(&self) -> String {
        format!("任务 '{}' (状态: {})", self.id, self.state)
    }
}

/// 提交任务时的输入，max_retries 缺省时使用配置中的默认值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSubmission {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl JobSubmission {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn into_job(self, default_max_retries: i32, now: DateTime<Utc>) -> QueueResult<Job> {
        if self.id.trim().is_empty() {
            return Err(QueueError::validation_error("任务ID不能为空"));
        }
        if self.command.trim().is_empty() {
            return Err(QueueError::validation_error("任务命令不能为空"));
        }

        let max_retries = self.max_retries.unwrap_or(default_max_retries);
        if max_retries <= 0 {
            return Err(QueueError::validation_error(format!(
                "max_retries必须大于0，当前值: {max_retries}"
            )));
        }

        Ok(Job::new(self.id, self.command, max_retries, now))
    }
}

/// 任务行上的租约信息，不属于对外的 Job 视图
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead: i64,
}

impl JobStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (JobState, i64)>) -> Self {
        let mut stats = Self::default();
        for (state, count) in counts {
            *stats.count_mut(state) += count;
        }
        stats
    }

    pub fn count(&self, state: JobState) -> i64 {
        match state {
            JobState::Pending => self.pending,
            JobState::Processing => self.processing,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Dead => self.dead,
        }
    }

    fn count_mut(&mut self, state: JobState) -> &mut i64 {
        match state {
            JobState::Pending => &mut self.pending,
            JobState::Processing => &mut self.processing,
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
            JobState::Dead => &mut self.dead,
        }
    }

    pub fn total(&self) -> i64 {
        JobState::ALL.iter().map(|state| self.count(*state)).sum()
    }
}
