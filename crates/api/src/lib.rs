//! # Taskplane API
//!
//! 调度器的HTTP管理接口，基于Axum构建。
//!
//! ## API 端点
//!
//! - `GET /health` - 健康检查
//! - `GET /api/v1/tasks` - 获取任务列表
//! - `POST /api/v1/tasks` - 创建任务
//! - `GET /api/v1/tasks/{name}` - 获取任务详情
//! - `DELETE /api/v1/tasks/{name}` - 停止并删除任务
//! - `POST /api/v1/tasks/{name}/start` - 重新启动已停止的任务
//! - `POST /api/v1/tasks/{name}/stop` - 停止任务
//! - `GET /api/v1/workers` - 获取已连接的worker
//!
//! 控制操作的响应体为 `{"status": "ok"}` 或 `{"status": "error", "message": "..."}`。

pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_app, create_routes, AppState};

use taskplane_core::config::ApiConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

/// 在给定的监听器上运行API服务，直到收到关闭信号
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    config: &ApiConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    let app = create_app(state, config);
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "API服务器开始监听");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            info!("API服务器收到关闭信号");
        })
        .await
}
