use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use queuectl_domain::entities::Job;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// 一次执行的结果。失败只是一个结果，由状态机决定重试还是进入死信队列
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success { stdout: String },
    Failure { reason: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> ExecutionOutcome;
}

/// Shell任务执行器，通过 `sh -c` 运行任务命令
pub struct ShellExecutor {
    shell: String,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: "sh".to_string(),
            timeout,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, job: &Job) -> ExecutionOutcome {
        let start_time = Instant::now();
        debug!("执行Shell任务: id={}, command={}", job.id, job.command);

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&job.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 命令及其派生的子进程位于独立进程组，超时后整组终止
            .process_group(0)
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("启动任务 '{}' 的命令失败: {}", job.id, e);
                return ExecutionOutcome::Failure {
                    reason: format!("启动命令失败: {e}"),
                };
            }
        };

        let process_group = child.id().and_then(|pid| i32::try_from(pid).ok());

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionOutcome::Failure {
                    reason: format!("等待命令结束失败: {e}"),
                };
            }
            Err(_) => {
                warn!("任务 '{}' 执行超时 ({:?})", job.id, self.timeout);
                if let Some(pgid) = process_group {
                    kill_process_group(&job.id, pgid);
                }
                return ExecutionOutcome::Failure {
                    reason: format!("执行超时 ({:?})", self.timeout),
                };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();

        info!(
            "Shell任务执行完成: id={}, success={}, exit_code={:?}, duration={}ms",
            job.id,
            output.status.success(),
            output.status.code(),
            start_time.elapsed().as_millis()
        );

        if output.status.success() {
            return ExecutionOutcome::Success { stdout };
        }

        let status = match output.status.code() {
            Some(code) => format!("退出码 {code}"),
            None => "命令被信号终止".to_string(),
        };
        let reason = if stderr.is_empty() {
            status
        } else {
            format!("{status}: {stderr}")
        };
        ExecutionOutcome::Failure { reason }
    }
}

/// 终止超时任务的整个进程组，进程组已不存在时忽略
fn kill_process_group(job_id: &str, pgid: i32) {
    if pgid <= 0 {
        return;
    }

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => debug!("已终止任务 '{}' 的进程组 {}", job_id, pgid),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("终止任务 '{}' 的进程组 {} 失败: {}", job_id, pgid, e),
    }
}
