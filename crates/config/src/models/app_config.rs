use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig,
    logging::{LogConfig, LogFormat},
    queue_worker::{QueueConfig, WorkerConfig},
};
use crate::{ConfigError, ConfigResult};

pub const DEFAULT_CONFIG_PATH: &str = "queuectl.toml";
pub const CONFIG_ENV_PREFIX: &str = "QUEUECTL";

/// 可通过 `config get/set` 访问的配置项
const KNOWN_KEYS: &[&str] = &[
    "database.path",
    "database.max_connections",
    "database.busy_timeout_seconds",
    "queue.max_retries",
    "queue.backoff_base",
    "worker.check_interval_seconds",
    "worker.execution_timeout_seconds",
    "worker.lease_timeout_seconds",
    "worker.shutdown_grace_seconds",
    "worker.manifest_path",
    "logging.level",
    "logging.format",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format), missing file is allowed
    /// 3. Environment variable overrides (prefix: QUEUECTL_, nested separator: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let builder = ConfigBuilder::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 写回配置文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_toml()?;
        std::fs::write(path, content)
            .with_context(|| format!("写入配置文件失败: {}", path.display()))
    }

    /// Validate configuration effectiveness
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.queue.validate().context("队列配置验证失败")?;
        self.worker.validate().context("Worker配置验证失败")?;
        self.logging.validate().context("日志配置验证失败")?;

        Ok(())
    }

    /// 将旧版扁平键名映射为分节键名
    pub fn canonical_key(key: &str) -> &str {
        match key {
            "max_retries" => "queue.max_retries",
            "backoff_base" => "queue.backoff_base",
            "worker_check_interval" => "worker.check_interval_seconds",
            "db_path" => "database.path",
            other => other,
        }
    }

    pub fn get_value(&self, key: &str) -> ConfigResult<String> {
        let value = match Self::canonical_key(key) {
            "database.path" => self.database.path.clone(),
            "database.max_connections" => self.database.max_connections.to_string(),
            "database.busy_timeout_seconds" => self.database.busy_timeout_seconds.to_string(),
            "queue.max_retries" => self.queue.max_retries.to_string(),
            "queue.backoff_base" => self.queue.backoff_base.to_string(),
            "worker.check_interval_seconds" => self.worker.check_interval_seconds.to_string(),
            "worker.execution_timeout_seconds" => {
                self.worker.execution_timeout_seconds.to_string()
            }
            "worker.lease_timeout_seconds" => self.worker.lease_timeout_seconds.to_string(),
            "worker.shutdown_grace_seconds" => self.worker.shutdown_grace_seconds.to_string(),
            "worker.manifest_path" => self.worker.manifest_path.clone(),
            "logging.level" => self.logging.level.clone(),
            "logging.format" => self.logging.format.to_string(),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        };
        Ok(value)
    }

    /// 修改单个配置项，修改后的整体配置必须仍然有效
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let canonical = Self::canonical_key(key);
        let mut updated = self.clone();

        match canonical {
            "database.path" => updated.database.path = value.to_string(),
            "database.max_connections" => {
                updated.database.max_connections = parse_number(canonical, value)?
            }
            "database.busy_timeout_seconds" => {
                updated.database.busy_timeout_seconds = parse_number(canonical, value)?
            }
            "queue.max_retries" => updated.queue.max_retries = parse_number(canonical, value)?,
            "queue.backoff_base" => updated.queue.backoff_base = parse_number(canonical, value)?,
            "worker.check_interval_seconds" => {
                updated.worker.check_interval_seconds = parse_number(canonical, value)?
            }
            "worker.execution_timeout_seconds" => {
                updated.worker.execution_timeout_seconds = parse_number(canonical, value)?
            }
            "worker.lease_timeout_seconds" => {
                updated.worker.lease_timeout_seconds = parse_number(canonical, value)?
            }
            "worker.shutdown_grace_seconds" => {
                updated.worker.shutdown_grace_seconds = parse_number(canonical, value)?
            }
            "worker.manifest_path" => updated.worker.manifest_path = value.to_string(),
            "logging.level" => updated.logging.level = value.to_lowercase(),
            "logging.format" => {
                updated.logging.format =
                    value
                        .parse::<LogFormat>()
                        .map_err(|message| ConfigError::InvalidValue {
                            key: canonical.to_string(),
                            message,
                        })?
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }

        updated
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                key: canonical.to_string(),
                message: format!("{e:#}"),
            })?;

        *self = updated;
        Ok(())
    }

    /// 按固定顺序列出所有配置项
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        KNOWN_KEYS
            .iter()
            .filter_map(|key| self.get_value(key).ok().map(|value| (*key, value)))
            .collect()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{value} 不是有效的非负整数"),
        })
}
