use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use queuectl_domain::{
    entities::{Job, JobState, JobStats, Lease},
    repositories::JobRepository,
};
use queuectl_errors::{QueueError, QueueResult};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, instrument, warn};

use crate::{
    database::mapping::MappingHelpers,
    error_handling::{RepositoryErrorHelpers, RepositoryOperation},
    job_context,
};

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, last_error, next_retry_at";

/// 可领取条件：?1 为当前时间，?2 为租约过期的截止时间。
/// pending/failed 需到达重试时间且无有效租约；processing 且租约过期（或缺失）的任务可被回收。
const CLAIMABLE_PREDICATE: &str = r#"
    (
        (state IN ('pending', 'failed')
            AND (next_retry_at IS NULL OR next_retry_at <= ?1)
            AND (locked_by IS NULL OR locked_at IS NULL OR locked_at <= ?2))
        OR
        (state = 'processing'
            AND (locked_at IS NULL OR locked_at <= ?2))
    )
"#;

pub struct SqliteJobRepository {
    pool: SqlitePool,
    lease_timeout: chrono::Duration,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool, lease_timeout: Duration) -> Self {
        let lease_timeout =
            chrono::Duration::from_std(lease_timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            pool,
            lease_timeout,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lease_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// 第一阶段：按 created_at、id 升序挑选候选任务
    async fn select_candidate(&self, now: &str, cutoff: &str) -> Result<Option<String>, sqlx::Error> {
        let sql = format!(
            "SELECT id FROM jobs WHERE {CLAIMABLE_PREDICATE} ORDER BY created_at ASC, id ASC LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row.try_get::<String, _>("id")).transpose()
    }

    /// 第二阶段：带完整条件的条件更新，受影响行数为0说明已被其他Worker抢先
    async fn try_acquire(
        &self,
        id: &str,
        worker_id: &str,
        now: &str,
        cutoff: &str,
    ) -> Result<bool, sqlx::Error> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET state = 'processing',
                locked_by = ?3,
                locked_at = ?1,
                updated_at = MAX(created_at, ?1)
            WHERE id = ?4 AND {CLAIMABLE_PREDICATE}
            "#
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .bind(cutoff)
            .bind(worker_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 第三阶段：重新读取确认租约归属
    async fn confirm_ownership(
        &self,
        id: &str,
        worker_id: &str,
        now: &str,
    ) -> Result<Option<SqliteRow>, sqlx::Error> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1 AND locked_by = ?2 AND locked_at = ?3 AND state = 'processing'"
        );

        sqlx::query(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let context = job_context!(RepositoryOperation::Create, job_id = job.id.as_str());

        sqlx::query(
            r#"
            INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, last_error, next_retry_at, locked_by, locked_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(MappingHelpers::format_timestamp(&job.created_at))
        .bind(MappingHelpers::format_timestamp(&job.updated_at))
        .bind(&job.last_error)
        .bind(MappingHelpers::format_optional_timestamp(job.next_retry_at.as_ref()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        RepositoryErrorHelpers::log_operation_success(
            &context,
            &job.entity_description(),
            Some(&format!("max_retries: {}", job.max_retries)),
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(&self, id: &str) -> QueueResult<Job> {
        let context = job_context!(RepositoryOperation::Read, job_id = id);

        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        match row {
            Some(row) => MappingHelpers::row_to_job(&row),
            None => Err(RepositoryErrorHelpers::job_not_found(context)),
        }
    }

    #[instrument(skip(self, now))]
    async fn claim(&self, worker_id: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let context = job_context!(RepositoryOperation::Claim, worker_id = worker_id);
        let now_text = MappingHelpers::format_timestamp(&now);
        let cutoff_text = MappingHelpers::format_timestamp(&self.lease_cutoff(now));

        let candidate = self
            .select_candidate(&now_text, &cutoff_text)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let Some(id) = candidate else {
            return Ok(None);
        };
        let context = context.with_job_id(id.as_str());

        let acquired = self
            .try_acquire(&id, worker_id, &now_text, &cutoff_text)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if !acquired {
            debug!("任务 '{}' 已被其他Worker领取", id);
            return Ok(None);
        }

        let row = self
            .confirm_ownership(&id, worker_id, &now_text)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        match row {
            Some(row) => {
                let job = MappingHelpers::row_to_job(&row)?;
                RepositoryErrorHelpers::log_operation_success(
                    &context,
                    &job.entity_description(),
                    Some(&format!("attempts: {}/{}", job.attempts, job.max_retries)),
                );
                Ok(Some(job))
            }
            None => {
                debug!("任务 '{}' 的租约在确认前已被其他Worker接管", id);
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, state = %job.state))]
    async fn update(&self, job: &Job) -> QueueResult<bool> {
        let context = job_context!(RepositoryOperation::Update, job_id = job.id.as_str())
            .with_additional_info(format!("state={}, attempts={}", job.state, job.attempts));

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET command = ?2,
                state = ?3,
                attempts = ?4,
                max_retries = ?5,
                updated_at = ?6,
                last_error = ?7,
                next_retry_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&job.id)
        .bind(&job.command)
        .bind(job.state)
        .bind(job.attempts)
        .bind(job.max_retries)
        .bind(MappingHelpers::format_timestamp(&job.updated_at.max(job.created_at)))
        .bind(&job.last_error)
        .bind(MappingHelpers::format_optional_timestamp(job.next_retry_at.as_ref()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if result.rows_affected() == 0 {
            warn!("更新任务 '{}' 时未找到记录", job.id);
            return Ok(false);
        }

        RepositoryErrorHelpers::log_operation_success(&context, &job.entity_description(), None);
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn release(&self, id: &str) -> QueueResult<()> {
        let context = job_context!(RepositoryOperation::Release, job_id = id);

        sqlx::query("UPDATE jobs SET locked_by = NULL, locked_at = NULL WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        RepositoryErrorHelpers::log_operation_success(&context, &context.entity_description(), None);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, state: Option<JobState>) -> QueueResult<Vec<Job>> {
        let context = job_context!(RepositoryOperation::Query);

        let rows = match state {
            Some(state) => {
                let sql = format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at DESC, id DESC"
                );
                sqlx::query(&sql).bind(state).fetch_all(&self.pool).await
            }
            None => {
                let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
                sqlx::query(&sql).fetch_all(&self.pool).await
            }
        }
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let jobs: QueueResult<Vec<Job>> = rows.iter().map(MappingHelpers::row_to_job).collect();
        let jobs = jobs?;
        debug!("查询到 {} 个任务", jobs.len());
        Ok(jobs)
    }

    #[instrument(skip(self))]
    async fn stats(&self) -> QueueResult<JobStats> {
        let context = job_context!(RepositoryOperation::Query)
            .with_additional_info("按状态统计".to_string());

        let rows = sqlx::query("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        let mut counts = Vec::with_capacity(rows.len());
        for row in &rows {
            let state: JobState = row.try_get("state")?;
            let count: i64 = row.try_get("count")?;
            counts.push((state, count));
        }

        Ok(JobStats::from_counts(counts))
    }

    #[instrument(skip(self, now))]
    async fn reset_dead(&self, id: &str, now: DateTime<Utc>) -> QueueResult<Job> {
        let context = job_context!(RepositoryOperation::Reset, job_id = id);

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = 0,
                last_error = NULL,
                next_retry_at = NULL,
                locked_by = NULL,
                locked_at = NULL,
                updated_at = MAX(created_at, ?2)
            WHERE id = ?1 AND state = 'dead'
            "#,
        )
        .bind(id)
        .bind(MappingHelpers::format_timestamp(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        if result.rows_affected() == 0 {
            let current = self.fetch(id).await?;
            return Err(QueueError::InvalidState {
                id: current.id,
                actual: current.state.to_string(),
                expected: JobState::Dead.to_string(),
            });
        }

        let job = self.fetch(id).await?;
        RepositoryErrorHelpers::log_operation_success(&context, &job.entity_description(), None);
        Ok(job)
    }

    #[instrument(skip(self))]
    async fn lease(&self, id: &str) -> QueueResult<Option<Lease>> {
        let context = job_context!(RepositoryOperation::Read, job_id = id);

        let row = sqlx::query("SELECT locked_by, locked_at FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryErrorHelpers::job_database_error(context.clone(), e))?;

        match row {
            Some(row) => MappingHelpers::row_to_lease(&row),
            None => Err(RepositoryErrorHelpers::job_not_found(context)),
        }
    }
}
