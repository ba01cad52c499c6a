use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 调度器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 控制通道监听地址
    pub bind_address: String,
    /// 存活检测间隔（毫秒）
    pub liveness_interval_ms: u64,
    /// 派发扫描间隔（毫秒）
    pub dispatch_interval_ms: u64,
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5556".to_string(),
            liveness_interval_ms: 1000,
            dispatch_interval_ms: 1000,
            heartbeat_timeout_seconds: 10,
        }
    }
}

impl DispatcherConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!("无效的监听地址: {}", self.bind_address));
        }

        if self.liveness_interval_ms == 0 || self.dispatch_interval_ms == 0 {
            return Err(anyhow::anyhow!("扫描间隔必须大于0"));
        }

        if self.heartbeat_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }

        Ok(())
    }
}

/// Worker配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 调度器主机名或IP，同时用于推导制品仓库地址
    pub address: String,
    pub port: u16,
    /// 制品仓库HTTP端口
    pub artifact_port: u16,
    /// 下载的任务制品及沙箱所在目录
    pub tasks_dir: String,
    /// 启动时执行一次的沙箱初始化命令
    pub sandbox_init_command: Vec<String>,
    /// 沙箱解释器，相对 `tasks_dir`
    pub interpreter: String,
    pub heartbeat_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub info_delay_ms: u64,
    pub info_interval_ms: u64,
    pub handler_delay_ms: u64,
    pub initial_backoff_ms: u64,
    /// 重连退避上限，未设置时不封顶
    pub max_backoff_ms: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 5556,
            artifact_port: 5001,
            tasks_dir: ".tasks".to_string(),
            sandbox_init_command: vec!["sh".to_string(), "init.sh".to_string()],
            interpreter: "venv/bin/python".to_string(),
            heartbeat_delay_ms: 1600,
            heartbeat_interval_ms: 2000,
            info_delay_ms: 2000,
            info_interval_ms: 60_000,
            handler_delay_ms: 2000,
            initial_backoff_ms: 1000,
            max_backoff_ms: None,
        }
    }
}

impl WorkerConfig {
    pub fn scheduler_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn artifact_base_url(&self) -> String {
        format!("http://{}:{}/api/v1", self.address, self.artifact_port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.address.is_empty() {
            return Err(anyhow::anyhow!("调度器地址不能为空"));
        }

        if self.port == 0 || self.artifact_port == 0 {
            return Err(anyhow::anyhow!("端口必须大于0"));
        }

        if self.tasks_dir.is_empty() {
            return Err(anyhow::anyhow!("任务目录不能为空"));
        }

        if self.interpreter.is_empty() {
            return Err(anyhow::anyhow!("沙箱解释器路径不能为空"));
        }

        if self.heartbeat_interval_ms == 0 || self.info_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳和信息上报间隔必须大于0"));
        }

        if self.initial_backoff_ms == 0 {
            return Err(anyhow::anyhow!("初始重连间隔必须大于0"));
        }

        if let Some(max) = self.max_backoff_ms {
            if max < self.initial_backoff_ms {
                return Err(anyhow::anyhow!(
                    "重连间隔上限 {}ms 小于初始间隔 {}ms",
                    max,
                    self.initial_backoff_ms
                ));
            }
        }

        Ok(())
    }
}
