pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, LogConfig, LogFormat, QueueConfig, WorkerConfig,
    CONFIG_ENV_PREFIX, DEFAULT_CONFIG_PATH,
};

/// Configuration error type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error enumeration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("未知的配置项: {0}")]
    UnknownKey(String),

    #[error("配置项 {key} 的值无效: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests;
