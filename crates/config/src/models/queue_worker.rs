use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 任务提交与重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// 提交时未指定 max_retries 的任务使用该默认值
    pub max_retries: u32,
    /// 指数退避底数，第 n 次失败后等待 backoff_base^n 秒
    pub backoff_base: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_retries == 0 {
            return Err(anyhow::anyhow!("最大重试次数必须大于0"));
        }

        if self.backoff_base == 0 {
            return Err(anyhow::anyhow!("退避底数必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// 队列为空时的轮询间隔
    pub check_interval_seconds: u64,
    pub execution_timeout_seconds: u64,
    /// 租约超过该时长视为失效，可被其他Worker重新领取
    pub lease_timeout_seconds: u64,
    /// 停止时等待Worker自行退出的时间，超时后强制终止
    pub shutdown_grace_seconds: u64,
    pub manifest_path: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 1,
            execution_timeout_seconds: 300,
            lease_timeout_seconds: 300,
            shutdown_grace_seconds: 10,
            manifest_path: "queuectl_workers.pid".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.execution_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务执行超时时间必须大于0"));
        }

        if self.lease_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("租约超时时间必须大于0"));
        }

        // 租约必须覆盖整个执行超时
        if self.lease_timeout_seconds < self.execution_timeout_seconds {
            return Err(anyhow::anyhow!(
                "租约超时时间 ({}秒) 不能小于任务执行超时时间 ({}秒)",
                self.lease_timeout_seconds,
                self.execution_timeout_seconds
            ));
        }

        if self.manifest_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker清单文件路径不能为空"));
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}
