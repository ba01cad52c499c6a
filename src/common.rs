use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use taskplane_core::{config::AppConfig, LogFormat, LogLevel};

/// 关闭信号发出后等待服务退出的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 通用的启动参数
#[derive(Debug, Clone)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
}

/// 初始化日志并加载配置
pub fn bootstrap(startup_config: &StartupConfig, service_name: &str) -> Result<AppConfig> {
    taskplane_core::init_logging(startup_config.log_level, startup_config.log_format)?;

    info!(service = service_name, "启动服务");
    if let Some(path) = &startup_config.config_path {
        info!(path = %path, "配置文件");
    }

    load_config(startup_config.config_path.as_deref())
}

/// 加载应用配置，未指定路径时依次查找默认位置
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载默认配置失败".to_string(),
    })
}

/// 在关闭信号发出后等待服务任务退出，超时则放弃等待
pub async fn join_with_timeout<T>(handle: JoinHandle<T>, service_name: &str) -> Option<T> {
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(value)) => {
            info!(service = service_name, "服务已优雅关闭");
            Some(value)
        }
        Ok(Err(e)) => {
            error!(service = service_name, error = %e, "服务任务异常退出");
            None
        }
        Err(_) => {
            warn!(service = service_name, "服务关闭超时，强制退出");
            None
        }
    }
}
