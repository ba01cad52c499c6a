use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use taskplane_core::{models::Task, SchedulerError};

use crate::{
    error::ApiResult,
    response::{ApiResponse, ControlReply},
    routes::AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    #[serde(default)]
    pub args: String,
    #[serde(default = "default_return_type")]
    pub return_type: String,
}

fn default_return_type() -> String {
    "string".to_string()
}

pub async fn list_tasks(State(state): State<AppState>) -> ApiResponse<Vec<Task>> {
    ApiResponse::success(state.controller.list_tasks().await)
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<ApiResponse<Task>> {
    let task = state
        .controller
        .get_task(&name)
        .await
        .ok_or_else(|| SchedulerError::TaskNotFound { name: name.clone() })?;
    Ok(ApiResponse::success(task))
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ControlReply {
    debug!(task = %request.name, "创建任务请求");
    ControlReply::created(
        state
            .controller
            .create_task(&request.name, &request.args, &request.return_type)
            .await,
    )
}

pub async fn start_task(State(state): State<AppState>, Path(name): Path<String>) -> ControlReply {
    ControlReply::new(state.controller.start_task(&name).await)
}

pub async fn stop_task(State(state): State<AppState>, Path(name): Path<String>) -> ControlReply {
    ControlReply::new(state.controller.stop_task(&name).await)
}

pub async fn delete_task(State(state): State<AppState>, Path(name): Path<String>) -> ControlReply {
    ControlReply::new(state.controller.delete_task(&name).await)
}
