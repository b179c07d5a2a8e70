use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use queuectl_errors::{QueueError, QueueResult};
use tokio::process::Child;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use super::manifest::{WorkerEntry, WorkerManifest};
use super::process::{is_alive, send_signal};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(250);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// 为每个Worker构造启动命令
pub trait WorkerLauncher: Send + Sync {
    fn command(&self, worker_id: &str) -> std::process::Command;
}

impl<F> WorkerLauncher for F
where
    F: Fn(&str) -> std::process::Command + Send + Sync,
{
    fn command(&self, worker_id: &str) -> std::process::Command {
        self(worker_id)
    }
}

/// 以 `<program> <args...> --id <worker_id>` 启动Worker进程。
/// 每个Worker放入独立的进程组，终端的 Ctrl+C 只送达控制进程。
pub struct ExecutableLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ExecutableLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl WorkerLauncher for ExecutableLauncher {
    fn command(&self, worker_id: &str) -> std::process::Command {
        use std::os::unix::process::CommandExt;

        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args).arg("--id").arg(worker_id);
        command.process_group(0);
        command
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// 收到 SIGTERM 的进程
    pub signaled: Vec<i32>,
    /// 宽限期后仍未退出、被 SIGKILL 的进程
    pub killed: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// 收到关闭信号后主动停止
    Stopped(StopReport),
    /// 所有Worker自行退出
    AllExited,
}

struct OwnedWorker {
    worker_id: String,
    pid: i32,
    child: Child,
}

/// Worker进程池：启动、存活探测、优雅停止
pub struct WorkerPool {
    manifest_path: PathBuf,
    grace_period: Duration,
    children: Vec<OwnedWorker>,
}

impl WorkerPool {
    pub fn new(manifest_path: impl Into<PathBuf>, grace_period: Duration) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            grace_period,
            children: Vec::new(),
        }
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// 当前进程启动且尚未退出的Worker
    pub fn owned_workers(&mut self) -> Vec<WorkerEntry> {
        self.reap_exited();
        self.children
            .iter()
            .map(|worker| WorkerEntry {
                worker_id: worker.worker_id.clone(),
                pid: worker.pid,
            })
            .collect()
    }

    /// 读取清单并探测存活的Worker；没有存活进程时删除清单
    pub fn active_workers(&mut self) -> QueueResult<Vec<i32>> {
        self.reap_exited();

        let Some(manifest) = WorkerManifest::load(&self.manifest_path)? else {
            return Ok(Vec::new());
        };

        let live: Vec<i32> = manifest.pids().into_iter().filter(|pid| is_alive(*pid)).collect();
        if live.is_empty() {
            debug!("清单中的Worker均已退出，删除清单");
            WorkerManifest::remove(&self.manifest_path)?;
        }
        Ok(live)
    }

    /// 启动 `worker-1 … worker-n` 并写入清单
    pub fn start(&mut self, count: usize, launcher: &dyn WorkerLauncher) -> QueueResult<WorkerManifest> {
        if count == 0 {
            return Err(QueueError::validation_error("Worker数量必须大于0"));
        }

        let live = self.active_workers()?;
        if !live.is_empty() {
            return Err(QueueError::PoolAlreadyRunning { pids: live });
        }

        for index in 1..=count {
            let worker_id = format!("worker-{index}");
            if let Err(e) = self.spawn_worker(&worker_id, launcher) {
                error!("启动 {} 失败，终止已启动的Worker: {}", worker_id, e);
                self.abort_spawned();
                return Err(e);
            }
        }

        let manifest = WorkerManifest::new(
            self.children
                .iter()
                .map(|worker| WorkerEntry {
                    worker_id: worker.worker_id.clone(),
                    pid: worker.pid,
                })
                .collect(),
        );

        if let Err(e) = manifest.save(&self.manifest_path) {
            self.abort_spawned();
            return Err(e);
        }

        info!("已启动 {} 个Worker: {:?}", count, manifest.pids());
        Ok(manifest)
    }

    fn spawn_worker(&mut self, worker_id: &str, launcher: &dyn WorkerLauncher) -> QueueResult<()> {
        let mut command = tokio::process::Command::from(launcher.command(worker_id));
        let child = command
            .spawn()
            .map_err(|e| QueueError::Process(format!("启动 {worker_id} 失败: {e}")))?;

        let pid = child
            .id()
            .and_then(|pid| i32::try_from(pid).ok())
            .ok_or_else(|| QueueError::Process(format!("无法获取 {worker_id} 的进程ID")))?;

        debug!("{} 已启动, PID {}", worker_id, pid);
        self.children.push(OwnedWorker {
            worker_id: worker_id.to_string(),
            pid,
            child,
        });
        Ok(())
    }

    fn abort_spawned(&mut self) {
        for mut worker in self.children.drain(..) {
            if let Err(e) = worker.child.start_kill() {
                warn!("终止 {} (PID {}) 失败: {}", worker.worker_id, worker.pid, e);
            }
        }
    }

    /// 回收已退出的子进程，避免僵尸进程在存活探测中被当作存活
    fn reap_exited(&mut self) {
        self.children.retain_mut(|worker| match worker.child.try_wait() {
            Ok(Some(status)) => {
                info!("{} (PID {}) 已退出: {}", worker.worker_id, worker.pid, status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("检查 {} (PID {}) 状态失败: {}", worker.worker_id, worker.pid, e);
                true
            }
        });
    }

    /// 向所有Worker发送 SIGTERM，宽限期后 SIGKILL 仍存活的进程，最后删除清单
    pub async fn stop(&mut self) -> QueueResult<StopReport> {
        let mut pids = WorkerManifest::load(&self.manifest_path)?
            .map(|manifest| manifest.pids())
            .unwrap_or_default();
        for worker in &self.children {
            if !pids.contains(&worker.pid) {
                pids.push(worker.pid);
            }
        }

        self.reap_exited();
        let mut report = StopReport::default();

        for pid in pids.into_iter().filter(|pid| is_alive(*pid)) {
            match send_signal(pid, Signal::SIGTERM) {
                Ok(true) => {
                    debug!("已向 PID {} 发送 SIGTERM", pid);
                    report.signaled.push(pid);
                }
                Ok(false) => {}
                Err(e) => warn!("{}", e),
            }
        }

        let deadline = Instant::now() + self.grace_period;
        let mut remaining = report.signaled.clone();
        loop {
            self.reap_exited();
            remaining.retain(|pid| is_alive(*pid));
            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            sleep(STOP_POLL_INTERVAL).await;
        }

        for pid in remaining {
            warn!("PID {} 在 {:?} 宽限期内未退出，发送 SIGKILL", pid, self.grace_period);
            match send_signal(pid, Signal::SIGKILL) {
                Ok(true) => report.killed.push(pid),
                Ok(false) => {}
                Err(e) => warn!("{}", e),
            }
        }

        for mut worker in self.children.drain(..) {
            if timeout(REAP_TIMEOUT, worker.child.wait()).await.is_err() {
                warn!("等待 {} (PID {}) 退出超时", worker.worker_id, worker.pid);
            }
        }

        WorkerManifest::remove(&self.manifest_path)?;
        info!(
            "Worker池已停止: {} 个正常退出, {} 个被强制终止",
            report.signaled.len() - report.killed.len(),
            report.killed.len()
        );
        Ok(report)
    }

    /// 前台监督当前进程启动的Worker，直到收到关闭信号或全部Worker退出
    pub async fn supervise(
        &mut self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> QueueResult<SupervisionOutcome> {
        let mut ticker = interval(SUPERVISE_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，停止所有Worker");
                    let report = self.stop().await?;
                    return Ok(SupervisionOutcome::Stopped(report));
                }
                _ = ticker.tick() => {
                    self.reap_exited();
                    if self.children.is_empty() {
                        info!("所有Worker已退出");
                        WorkerManifest::remove(&self.manifest_path)?;
                        return Ok(SupervisionOutcome::AllExited);
                    }
                }
            }
        }
    }
}
