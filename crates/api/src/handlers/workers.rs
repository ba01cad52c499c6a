use axum::extract::State;

use taskplane_core::models::ChannelInfo;

use crate::{response::ApiResponse, routes::AppState};

pub async fn list_workers(State(state): State<AppState>) -> ApiResponse<Vec<ChannelInfo>> {
    ApiResponse::success(state.controller.list_workers().await)
}
