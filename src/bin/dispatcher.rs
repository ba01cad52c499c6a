use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use taskplane::common::{bootstrap, join_with_timeout, StartupConfig};
use taskplane::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use taskplane_api::AppState;
use taskplane_core::{LogFormat, LogLevel};
use taskplane_dispatcher::{Scheduler, TaskController};

/// Taskplane 调度器：接受worker连接、派发任务并提供任务管理HTTP接口
#[derive(Debug, Parser)]
#[command(name = "taskplane-dispatcher", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 控制通道监听地址，覆盖配置文件
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// HTTP管理接口监听地址，覆盖配置文件
    #[arg(long, value_name = "ADDR")]
    api_bind: Option<String>,

    /// 不启动HTTP管理接口
    #[arg(long)]
    no_api: bool,

    /// 日志级别
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// 日志格式 (json, pretty, text)
    #[arg(long, value_name = "FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let startup_config = StartupConfig {
        config_path: cli.config.clone(),
        log_level: cli.log_level,
        log_format: cli.log_format,
    };

    let mut config = bootstrap(&startup_config, "dispatcher")?;
    if let Some(bind) = cli.bind {
        config.dispatcher.bind_address = bind;
    }
    if let Some(api_bind) = cli.api_bind {
        config.api.bind_address = api_bind;
    }
    if cli.no_api {
        config.api.enabled = false;
    }
    config.validate().context("命令行参数覆盖后配置无效")?;

    let scheduler = Arc::new(Scheduler::new(config.dispatcher.clone()));
    let listener = scheduler.bind().await.context("绑定控制通道地址失败")?;

    let shutdown_manager = ShutdownManager::new();

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move { scheduler.run(listener, shutdown_rx).await })
    };

    let api_handle = if config.api.enabled {
        let api_listener = TcpListener::bind(&config.api.bind_address)
            .await
            .with_context(|| format!("绑定API地址失败: {}", config.api.bind_address))?;
        let state = AppState {
            controller: TaskController::new(scheduler.clone()),
        };
        let api_config = config.api.clone();
        let shutdown_rx = shutdown_manager.subscribe().await;
        Some(tokio::spawn(async move {
            taskplane_api::serve(api_listener, state, &api_config, shutdown_rx).await
        }))
    } else {
        info!("HTTP管理接口已禁用");
        None
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    if let Some(Err(e)) = join_with_timeout(scheduler_handle, "dispatcher").await {
        error!(error = %e, "调度器运行失败");
    }
    if let Some(handle) = api_handle {
        if let Some(Err(e)) = join_with_timeout(handle, "api").await {
            error!(error = %e, "API服务器运行失败");
        }
    }

    info!("dispatcher 服务已退出");
    Ok(())
}
