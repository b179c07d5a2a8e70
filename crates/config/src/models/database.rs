use serde::{Deserialize, Serialize};

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite数据库文件路径
    pub path: String,
    pub max_connections: u32,
    /// 写锁竞争时的等待时间
    pub busy_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "queuectl.db".to_string(),
            max_connections: 5,
            busy_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.trim().is_empty() {
            return Err(anyhow::anyhow!("数据库路径不能为空"));
        }

        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("最大连接数必须大于0"));
        }

        if self.busy_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("忙等待超时时间必须大于0"));
        }

        Ok(())
    }
}
