use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("任务已存在: {id}")]
    DuplicateId { id: String },
    #[error("任务未找到: {id}")]
    NotFound { id: String },
    #[error("任务 {id} 状态为 {actual}，期望状态为 {expected}")]
    InvalidState {
        id: String,
        actual: String,
        expected: String,
    },
    #[error("Worker池已在运行 (PIDs: {pids:?})")]
    PoolAlreadyRunning { pids: Vec<i32> },
    #[error("进程控制错误: {0}")]
    Process(String),
    #[error("I/O错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type QueueResult<T> = Result<T, QueueError>;

impl QueueError {
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn duplicate_id<S: Into<String>>(id: S) -> Self {
        Self::DuplicateId { id: id.into() }
    }
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    /// 存储层故障，轮询循环会在下一个周期重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::Database(_) | QueueError::DatabaseOperation(_) | QueueError::Io(_)
        )
    }
    pub fn user_message(&self) -> &str {
        match self {
            QueueError::DuplicateId { .. } => "任务ID已存在，原任务保持不变",
            QueueError::NotFound { .. } => "请求的任务不存在",
            QueueError::InvalidState { .. } => "任务当前状态不允许该操作",
            QueueError::PoolAlreadyRunning { .. } => "Worker已在运行，请先停止",
            QueueError::ValidationError(_) => "输入数据验证失败",
            QueueError::Configuration(_) => "配置有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Internal(err.to_string())
    }
}
