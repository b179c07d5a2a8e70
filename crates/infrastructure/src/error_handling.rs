//! 仓储操作的错误处理
//!
//! 为每次数据库操作附带上下文（操作类型、任务ID、Worker），统一记录日志，
//! 并把主键冲突映射为 `DuplicateId`。

use std::fmt;

use chrono::{DateTime, Utc};
use queuectl_errors::QueueError;
use sqlx::Error as SqlxError;
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryOperation {
    Create,
    Read,
    Claim,
    Update,
    Release,
    Query,
    Reset,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryOperation::Create => write!(f, "创建"),
            RepositoryOperation::Read => write!(f, "查询"),
            RepositoryOperation::Claim => write!(f, "领取"),
            RepositoryOperation::Update => write!(f, "更新"),
            RepositoryOperation::Release => write!(f, "释放"),
            RepositoryOperation::Query => write!(f, "列表查询"),
            RepositoryOperation::Reset => write!(f, "重置"),
        }
    }
}

/// 任务仓储操作的上下文
#[derive(Debug, Clone)]
pub struct JobOperationContext {
    pub operation: RepositoryOperation,
    pub job_id: Option<String>,
    pub worker_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub additional_info: Option<String>,
}

impl JobOperationContext {
    pub fn new(operation: RepositoryOperation) -> Self {
        Self {
            operation,
            job_id: None,
            worker_id: None,
            timestamp: Utc::now(),
            additional_info: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_additional_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }

    pub fn entity_description(&self) -> String {
        match (&self.job_id, &self.worker_id) {
            (Some(id), Some(worker)) => format!("任务 '{id}' (Worker: {worker})"),
            (Some(id), None) => format!("任务 '{id}'"),
            (None, Some(worker)) => format!("任务 (Worker: {worker})"),
            (None, None) => "任务".to_string(),
        }
    }
}

pub struct RepositoryErrorHelpers;

impl RepositoryErrorHelpers {
    #[instrument(skip_all, fields(
        operation = %context.operation,
        job_id = ?context.job_id,
        worker_id = ?context.worker_id,
        timestamp = %context.timestamp,
    ))]
    pub fn job_database_error(context: JobOperationContext, error: SqlxError) -> QueueError {
        let entity_desc = context.entity_description();
        let operation_desc = context.operation.to_string();

        let error_msg = match &error {
            SqlxError::Database(db_error) if db_error.is_unique_violation() => {
                let id = context.job_id.clone().unwrap_or_default();
                error!(error = %error, "{}{}时发生主键冲突: 任务ID '{}' 已存在", operation_desc, entity_desc, id);
                return QueueError::duplicate_id(id);
            }
            SqlxError::Database(db_error) => {
                format!("{operation_desc}{entity_desc}时发生数据库错误: {db_error}")
            }
            SqlxError::PoolClosed => {
                format!("{operation_desc}{entity_desc}时数据库连接池已关闭")
            }
            SqlxError::PoolTimedOut => {
                format!("{operation_desc}{entity_desc}时数据库连接池超时")
            }
            SqlxError::Io(io_error) => {
                format!("{operation_desc}{entity_desc}时发生I/O错误: {io_error}")
            }
            _ => {
                format!("{operation_desc}{entity_desc}时发生未知数据库错误: {error}")
            }
        };

        let error_msg = match &context.additional_info {
            Some(info) => format!("{error_msg} ({info})"),
            None => error_msg,
        };

        error!(error = %error, "{}", error_msg);
        QueueError::database_error(error_msg)
    }

    pub fn job_not_found(context: JobOperationContext) -> QueueError {
        let id = context.job_id.clone().unwrap_or_default();
        debug!("{}{}时未找到记录", context.operation, context.entity_description());
        QueueError::not_found(id)
    }

    pub fn log_operation_success(
        context: &JobOperationContext,
        entity_desc: &str,
        additional_info: Option<&str>,
    ) {
        let base_msg = format!("{}{}成功", context.operation, entity_desc);

        if let Some(info) = additional_info {
            debug!("{}: {}", base_msg, info);
        } else {
            debug!("{}", base_msg);
        }
    }
}

/// 快速构造任务操作上下文
#[macro_export]
macro_rules! job_context {
    ($operation:expr) => {
        $crate::error_handling::JobOperationContext::new($operation)
    };
    ($operation:expr, job_id = $job_id:expr) => {
        $crate::error_handling::JobOperationContext::new($operation).with_job_id($job_id)
    };
    ($operation:expr, worker_id = $worker_id:expr) => {
        $crate::error_handling::JobOperationContext::new($operation).with_worker_id($worker_id)
    };
    ($operation:expr, job_id = $job_id:expr, worker_id = $worker_id:expr) => {
        $crate::error_handling::JobOperationContext::new($operation)
            .with_job_id($job_id)
            .with_worker_id($worker_id)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_description() {
        let context = job_context!(RepositoryOperation::Claim, job_id = "a", worker_id = "worker-1");
        assert_eq!(context.entity_description(), "任务 'a' (Worker: worker-1)");
        assert_eq!(context.operation.to_string(), "领取");

        let context = job_context!(RepositoryOperation::Query);
        assert_eq!(context.entity_description(), "任务");
    }

    #[test]
    fn test_pool_closed_maps_to_database_operation() {
        let context = job_context!(RepositoryOperation::Update, job_id = "b")
            .with_additional_info("attempts=2".to_string());
        let error = RepositoryErrorHelpers::job_database_error(context, SqlxError::PoolClosed);

        match error {
            QueueError::DatabaseOperation(msg) => {
                assert!(msg.contains("更新任务 'b'"));
                assert!(msg.contains("连接池已关闭"));
                assert!(msg.contains("attempts=2"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_found_keeps_job_id() {
        let context = job_context!(RepositoryOperation::Read, job_id = "missing");
        let error = RepositoryErrorHelpers::job_not_found(context);
        assert!(matches!(error, QueueError::NotFound { id } if id == "missing"));
    }
}
