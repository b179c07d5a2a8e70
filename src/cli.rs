use std::io::ErrorKind;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use queuectl_config::{AppConfig, LogFormat, DEFAULT_CONFIG_PATH};
use queuectl_domain::{Job, JobState, QueueError};
use queuectl_worker::{ExecutableLauncher, StopReport, SupervisionOutcome, WorkerManifest};
use tracing::info;

use crate::app::{worker_pool, Application, QueueStatus};
use crate::shutdown::{spawn_signal_listener, ShutdownManager};

const COMMAND_DISPLAY_WIDTH: usize = 40;

/// 命令行入口
#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "持久化后台任务队列 - 命令行工具")]
#[command(long_about = "提交Shell命令任务、管理Worker进程、查看队列状态与死信队列")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 配置文件路径 (默认 queuectl.toml，不存在时使用默认配置)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(long, global = true, value_parser = ["trace", "debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    /// 日志格式 (json, pretty, text)，覆盖配置文件
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 提交任务，例如 '{"id":"job1","command":"echo hello"}'
    Enqueue {
        /// 任务JSON: id、command，可选 max_retries
        job_json: String,
    },
    /// Worker管理
    Worker(WorkerCommands),
    /// 各状态任务数与运行中的Worker
    Status,
    /// 列出任务
    List {
        /// 按状态过滤 (pending, processing, completed, failed, dead)
        #[arg(short, long)]
        state: Option<JobState>,
    },
    /// 死信队列
    Dlq(DlqCommands),
    /// 配置管理
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct WorkerCommands {
    #[command(subcommand)]
    pub action: WorkerActions,
}

#[derive(Subcommand, Debug)]
pub enum WorkerActions {
    /// 启动Worker进程并在前台监督，Ctrl+C 停止
    Start {
        /// Worker数量
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
    /// 停止运行中的Worker
    Stop,
    /// 在当前进程中运行单个Worker
    #[command(hide = true)]
    Run {
        #[arg(long)]
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct DlqCommands {
    #[command(subcommand)]
    pub action: DlqActions,
}

#[derive(Subcommand, Debug)]
pub enum DlqActions {
    /// 列出死信任务
    List,
    /// 将死信任务重新放回待执行队列
    Retry {
        /// 任务ID
        job_id: String,
    },
}

#[derive(Args, Debug)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub action: ConfigActions,
}

#[derive(Subcommand, Debug)]
pub enum ConfigActions {
    /// 查看配置项，不指定键名时显示全部
    Get {
        /// 配置键，例如 queue.max_retries 或 max_retries
        key: Option<String>,
    },
    /// 修改配置项并写回配置文件
    Set {
        /// 配置键
        key: String,
        /// 新值
        value: String,
    },
    /// 列出全部配置项
    List,
}

impl Cli {
    /// 执行子命令
    pub async fn run(&self, config: AppConfig) -> Result<()> {
        match &self.command {
            Commands::Enqueue { job_json } => {
                let app = Application::new(config).await?;
                let job = app.enqueue(job_json).await?;
                print_enqueued(&job);
                app.close().await;
            }
            Commands::Worker(worker) => match &worker.action {
                WorkerActions::Start { count } => self.start_workers(&config, *count).await?,
                WorkerActions::Stop => stop_workers(&config).await?,
                WorkerActions::Run { id } => run_worker(config, id).await?,
            },
            Commands::Status => {
                let app = Application::new(config).await?;
                print_status(&app.status().await?);
                app.close().await;
            }
            Commands::List { state } => {
                let app = Application::new(config).await?;
                let jobs = app.queue().list(*state).await?;
                print_job_list(&jobs);
                app.close().await;
            }
            Commands::Dlq(dlq) => {
                let app = Application::new(config).await?;
                match &dlq.action {
                    DlqActions::List => print_dead_letter_list(&app.queue().dead_letter_jobs().await?),
                    DlqActions::Retry { job_id } => {
                        let job = app.queue().retry_dead(job_id).await?;
                        println!("任务 '{}' 已重新入队 (状态: {})", job.id, job.state);
                    }
                }
                app.close().await;
            }
            Commands::Config(cfg) => match &cfg.action {
                ConfigActions::Get { key: Some(key) } => {
                    println!("{}", config.get_value(key)?);
                }
                ConfigActions::Get { key: None } | ConfigActions::List => {
                    print_config_entries(&config);
                }
                ConfigActions::Set { key, value } => self.set_config_value(key, value)?,
            },
        }

        Ok(())
    }

    fn config_path(&self) -> &str {
        self.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH)
    }

    /// 以 `queuectl [全局参数] worker run --id <ID>` 重新启动自身作为Worker
    fn worker_launcher(&self) -> Result<ExecutableLauncher> {
        let program = std::env::current_exe().context("无法定位当前可执行文件")?;
        let mut launcher = ExecutableLauncher::new(program);

        if let Some(path) = &self.config {
            launcher = launcher.arg("--config").arg(path);
        }
        if let Some(level) = &self.log_level {
            launcher = launcher.arg("--log-level").arg(level);
        }
        if let Some(format) = &self.log_format {
            launcher = launcher.arg("--log-format").arg(format.to_string());
        }

        Ok(launcher.arg("worker").arg("run"))
    }

    async fn start_workers(&self, config: &AppConfig, count: usize) -> Result<()> {
        let mut pool = worker_pool(config);
        let launcher = self.worker_launcher()?;

        let manifest = match pool.start(count, &launcher) {
            Ok(manifest) => manifest,
            Err(QueueError::PoolAlreadyRunning { pids }) => {
                println!("Worker已在运行 (PIDs: {pids:?})，请先执行 `queuectl worker stop`");
                return Ok(());
            }
            Err(e) => return Err(e).context("启动Worker失败"),
        };

        print_manifest(&manifest);
        println!("Worker在前台运行，按 Ctrl+C 停止");

        let shutdown = ShutdownManager::new();
        let shutdown_rx = shutdown.subscribe().await;
        let listener = spawn_signal_listener(shutdown.clone());

        let outcome = pool.supervise(shutdown_rx).await;
        listener.abort();

        match outcome.context("监督Worker进程失败")? {
            SupervisionOutcome::Stopped(report) => print_stop_report(&report),
            SupervisionOutcome::AllExited => println!("所有Worker已退出"),
        }
        Ok(())
    }

    /// 只修改配置文件中的内容，环境变量覆盖不会被写入文件
    fn set_config_value(&self, key: &str, value: &str) -> Result<()> {
        let path = self.config_path();
        let mut file_config = match std::fs::read_to_string(path) {
            Ok(content) => AppConfig::from_toml(&content)
                .with_context(|| format!("读取配置文件失败: {path}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(e).with_context(|| format!("读取配置文件失败: {path}")),
        };

        file_config.set_value(key, value)?;
        file_config.save(path)?;

        let canonical = AppConfig::canonical_key(key);
        info!("配置项 {} 已更新并写入 {}", canonical, path);
        println!("{} = {}", canonical, file_config.get_value(canonical)?);
        Ok(())
    }
}

async fn stop_workers(config: &AppConfig) -> Result<()> {
    let mut pool = worker_pool(config);
    let active = pool.active_workers().context("读取Worker清单失败")?;
    if active.is_empty() {
        println!("没有运行中的Worker");
        return Ok(());
    }

    println!("正在停止 {} 个Worker...", active.len());
    let report = pool.stop().await.context("停止Worker失败")?;
    print_stop_report(&report);
    Ok(())
}

async fn run_worker(config: AppConfig, worker_id: &str) -> Result<()> {
    let app = Application::new(config).await?;

    let shutdown = ShutdownManager::new();
    let shutdown_rx = shutdown.subscribe().await;
    let listener = spawn_signal_listener(shutdown.clone());

    app.run_worker(worker_id, shutdown_rx).await;

    listener.abort();
    app.close().await;
    Ok(())
}

fn print_enqueued(job: &Job) {
    println!("任务已入队!");
    println!("  ID: {}", job.id);
    println!("  命令: {}", job.command);
    println!("  最大重试次数: {}", job.max_retries);
    println!("  创建时间: {}", format_time(job.created_at));
}

fn print_status(status: &QueueStatus) {
    println!("队列状态:");
    for state in JobState::ALL {
        println!("  {:<12} {}", state.as_str(), status.stats.count(state));
    }
    println!("  {:<12} {}", "total", status.stats.total());
    println!();

    if status.active_workers.is_empty() {
        println!("运行中的Worker: 0");
    } else {
        println!(
            "运行中的Worker: {} (PIDs: {})",
            status.active_workers.len(),
            status
                .active_workers
                .iter()
                .map(|pid| pid.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

fn print_job_list(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("没有找到任务");
        return;
    }

    println!(
        "{:<20} {:<12} {:<8} {:<40} {:<20}",
        "ID", "状态", "尝试", "命令", "更新时间"
    );
    println!("{}", "-".repeat(104));
    for job in jobs {
        println!(
            "{:<20} {:<12} {:<8} {:<40} {:<20}",
            job.id,
            job.state.as_str(),
            format!("{}/{}", job.attempts, job.max_retries),
            truncate(&job.command, COMMAND_DISPLAY_WIDTH),
            format_time(job.updated_at)
        );
    }
    println!("共 {} 个任务", jobs.len());
}

fn print_dead_letter_list(jobs: &[Job]) {
    if jobs.is_empty() {
        println!("死信队列为空");
        return;
    }

    println!("{:<20} {:<8} {:<40} {:<30}", "ID", "尝试", "命令", "最后错误");
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<20} {:<8} {:<40} {:<30}",
            job.id,
            job.attempts,
            truncate(&job.command, COMMAND_DISPLAY_WIDTH),
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    println!("共 {} 个死信任务", jobs.len());
}

fn print_manifest(manifest: &WorkerManifest) {
    println!("已启动 {} 个Worker:", manifest.workers.len());
    println!("{:<15} {:<10}", "Worker ID", "PID");
    println!("{}", "-".repeat(26));
    for worker in &manifest.workers {
        println!("{:<15} {:<10}", worker.worker_id, worker.pid);
    }
}

fn print_stop_report(report: &StopReport) {
    let graceful = report.signaled.len() - report.killed.len();
    println!("已停止 {} 个Worker", graceful);
    if !report.killed.is_empty() {
        println!("宽限期后被强制终止: {:?}", report.killed);
    }
}

fn print_config_entries(config: &AppConfig) {
    for (key, value) in config.entries() {
        println!("{key:<36} {value}");
    }
}

fn format_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut shortened: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    shortened.push_str("...");
    shortened
}
