use std::str::FromStr;
use std::time::Duration;

use queuectl_config::DatabaseConfig;
use queuectl_errors::QueueResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::{debug, info};

/// SQLite 连接池与表结构管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 打开（必要时创建）数据库文件并执行迁移
    pub async fn new(config: &DatabaseConfig) -> QueueResult<Self> {
        let options = if config.path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(&config.path)?
        } else {
            SqliteConnectOptions::new().filename(&config.path)
        };

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(config.busy_timeout_seconds));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .connect_with(options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;

        info!("数据库已就绪: {}", config.path);
        Ok(manager)
    }

    /// 内存数据库，只保留单个连接，连接关闭后数据随之消失
    pub async fn in_memory() -> QueueResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let manager = Self { pool };
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        debug!("执行SQLite数据库迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY NOT NULL,
                command TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_error TEXT,
                next_retry_at TEXT,
                locked_by TEXT,
                locked_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_next_retry_at ON jobs(next_retry_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        debug!("SQLite数据库迁移完成");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
