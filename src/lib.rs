//! # Taskplane
//!
//! 二进制入口的公共启动逻辑：日志、配置加载与优雅关闭。
//!
//! - `dispatcher`：调度器控制通道与任务管理HTTP接口
//! - `worker`：连接调度器并执行任务的worker代理

pub mod common;
pub mod shutdown;
