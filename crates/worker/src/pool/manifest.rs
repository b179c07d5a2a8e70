//! Worker进程清单
//!
//! 控制进程启动Worker后写入 `{version, started_at, workers: [{worker_id, pid}]}`，
//! 文件不存在即表示没有运行中的Worker池。

use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use queuectl_errors::QueueResult;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerEntry {
    pub worker_id: String,
    pub pid: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerManifest {
    pub version: u32,
    pub started_at: DateTime<Utc>,
    pub workers: Vec<WorkerEntry>,
}

impl WorkerManifest {
    pub fn new(workers: Vec<WorkerEntry>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            started_at: Utc::now(),
            workers,
        }
    }

    pub fn pids(&self) -> Vec<i32> {
        self.workers.iter().map(|worker| worker.pid).collect()
    }

    /// 读取清单。文件不存在、内容损坏或版本不识别时都视为没有Worker池
    pub fn load(path: &Path) -> QueueResult<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: Self = match serde_json::from_str(&content) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Worker清单 {} 无法解析，忽略: {}", path.display(), e);
                return Ok(None);
            }
        };

        if manifest.version != MANIFEST_VERSION {
            warn!(
                "Worker清单 {} 版本为 {}，当前支持版本 {}，忽略",
                path.display(),
                manifest.version,
                MANIFEST_VERSION
            );
            return Ok(None);
        }

        Ok(Some(manifest))
    }

    /// 写入同目录下的临时文件后重命名，读者不会看到写了一半的清单
    pub fn save(&self, path: &Path) -> QueueResult<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| e.error)?;

        debug!("Worker清单已写入 {}: {} 个Worker", path.display(), self.workers.len());
        Ok(())
    }

    pub fn remove(path: &Path) -> QueueResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Worker清单已删除: {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
