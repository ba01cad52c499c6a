use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use taskplane_core::config::ApiConfig;
use taskplane_dispatcher::TaskController;

use crate::handlers::{
    health::health_check,
    tasks::{create_task, delete_task, get_task, list_tasks, start_task, stop_task},
    workers::list_workers,
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub controller: TaskController,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 任务管理API
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route("/api/v1/tasks/{name}", get(get_task).delete(delete_task))
        .route("/api/v1/tasks/{name}/start", post(start_task))
        .route("/api/v1/tasks/{name}/stop", post(stop_task))
        // Worker管理API
        .route("/api/v1/workers", get(list_workers))
        .with_state(state)
}

/// 创建带中间件的完整应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state).layer(TraceLayer::new_for_http());
    if config.cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
