#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use taskplane_core::config::WorkerConfig;

type Scripts = Arc<HashMap<String, String>>;

async fn download(State(scripts): State<Scripts>, Path(name): Path<String>) -> Response {
    match scripts.get(&name) {
        Some(body) => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={name}.sh"),
            )],
            body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Serve shell scripts by task name the way the artifact store does
pub async fn start_artifact_store(scripts: &[(&str, &str)]) -> SocketAddr {
    let scripts: Scripts = Arc::new(
        scripts
            .iter()
            .map(|(name, body)| (name.to_string(), body.to_string()))
            .collect(),
    );
    let app = Router::new()
        .route("/api/v1/tasks/{name}/download", get(download))
        .with_state(scripts);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}

pub fn worker_config(
    scheduler: SocketAddr,
    artifact_store: SocketAddr,
    tasks_dir: &std::path::Path,
) -> WorkerConfig {
    WorkerConfig {
        address: "127.0.0.1".to_string(),
        port: scheduler.port(),
        artifact_port: artifact_store.port(),
        tasks_dir: tasks_dir.to_string_lossy().into_owned(),
        sandbox_init_command: Vec::new(),
        interpreter: "/bin/sh".to_string(),
        heartbeat_delay_ms: 50,
        heartbeat_interval_ms: 100,
        info_delay_ms: 50,
        info_interval_ms: 60_000,
        handler_delay_ms: 50,
        initial_backoff_ms: 50,
        max_backoff_ms: None,
    }
}
