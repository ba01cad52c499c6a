use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use taskplane_core::models::{ControlResponse, TASK_NOT_FOUND};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// 控制操作的HTTP响应
///
/// 响应体即 `ControlResponse` 原样序列化；`task not found` 映射为404，
/// 其余错误映射为409。
#[derive(Debug, Clone)]
pub struct ControlReply {
    pub response: ControlResponse,
    pub success_status: StatusCode,
}

impl ControlReply {
    pub fn new(response: ControlResponse) -> Self {
        Self {
            response,
            success_status: StatusCode::OK,
        }
    }

    pub fn created(response: ControlResponse) -> Self {
        Self {
            response,
            success_status: StatusCode::CREATED,
        }
    }
}

impl IntoResponse for ControlReply {
    fn into_response(self) -> Response {
        let status = if self.response.is_ok() {
            self.success_status
        } else if self.response.message.as_deref() == Some(TASK_NOT_FOUND) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::CONFLICT
        };
        (status, Json(self.response)).into_response()
    }
}
