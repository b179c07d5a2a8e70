use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use queuectl::Cli;
use queuectl_config::{AppConfig, LogFormat};
use queuectl_errors::QueueError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误: {e:#}");
            if let Some(queue_error) = e.downcast_ref::<QueueError>() {
                eprintln!("提示: {}", queue_error.user_message());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let log_format = cli.log_format.unwrap_or(config.logging.format);
    init_logging(&log_level, log_format)?;

    cli.run(config).await
}

/// 初始化日志系统，RUST_LOG 优先于配置的级别。
/// 日志写入 stderr，stdout 只输出命令结果
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .context("初始化文本日志格式失败")?,
    }

    Ok(())
}
