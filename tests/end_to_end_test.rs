use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use taskplane::shutdown::ShutdownManager;
use taskplane_api::AppState;
use taskplane_core::config::{ApiConfig, DispatcherConfig, WorkerConfig};
use taskplane_dispatcher::{Scheduler, TaskController};
use taskplane_worker::WorkerService;

async fn download(Path(name): Path<String>) -> Response {
    match name.as_str() {
        "greet" => (
            [(header::CONTENT_DISPOSITION, "attachment; filename=greet.sh")],
            "echo \"hello $1\"",
        )
            .into_response(),
        "forever" => (
            [(header::CONTENT_DISPOSITION, "attachment; filename=forever.sh")],
            "exec sleep 30",
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn bind_local() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    (listener, address)
}

struct Cluster {
    api: SocketAddr,
    shutdown: ShutdownManager,
    _tasks_dir: tempfile::TempDir,
}

async fn start_cluster() -> Cluster {
    let shutdown = ShutdownManager::new();

    let scheduler = Arc::new(Scheduler::new(DispatcherConfig {
        bind_address: "127.0.0.1:0".to_string(),
        liveness_interval_ms: 100,
        dispatch_interval_ms: 100,
        heartbeat_timeout_seconds: 2,
    }));
    let (control_listener, control) = bind_local().await;
    tokio::spawn(scheduler.clone().run(control_listener, shutdown.subscribe().await));

    let (api_listener, api) = bind_local().await;
    let state = AppState {
        controller: TaskController::new(scheduler),
    };
    let api_shutdown = shutdown.subscribe().await;
    tokio::spawn(async move {
        taskplane_api::serve(api_listener, state, &ApiConfig::default(), api_shutdown).await
    });

    let (store_listener, store) = bind_local().await;
    let store_app = Router::new().route("/api/v1/tasks/{name}/download", get(download));
    tokio::spawn(async move { axum::serve(store_listener, store_app).await });

    let tasks_dir = tempfile::tempdir().unwrap();
    let worker = WorkerService::new(WorkerConfig {
        address: "127.0.0.1".to_string(),
        port: control.port(),
        artifact_port: store.port(),
        tasks_dir: tasks_dir.path().to_string_lossy().into_owned(),
        sandbox_init_command: Vec::new(),
        interpreter: "/bin/sh".to_string(),
        heartbeat_delay_ms: 50,
        heartbeat_interval_ms: 100,
        info_delay_ms: 50,
        info_interval_ms: 60_000,
        handler_delay_ms: 50,
        initial_backoff_ms: 50,
        max_backoff_ms: Some(500),
    });
    let worker_shutdown = shutdown.subscribe().await;
    tokio::spawn(async move { worker.run(worker_shutdown).await });

    Cluster {
        api,
        shutdown,
        _tasks_dir: tasks_dir,
    }
}

async fn task_status(client: &reqwest::Client, api: SocketAddr, name: &str) -> Value {
    client
        .get(format!("http://{api}/api/v1/tasks/{name}"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap()
}

async fn wait_for_task(client: &reqwest::Client, api: SocketAddr, name: &str, status: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let body = task_status(client, api, name).await;
            if body["data"]["status"] == status {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("task did not reach the expected status in time")
}

async fn wait_for_worker(client: &reqwest::Client, api: SocketAddr) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let body: Value = client
                .get(format!("http://{api}/api/v1/workers"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if body["data"].as_array().is_some_and(|workers| !workers.is_empty()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("worker did not connect in time");
}

#[tokio::test]
async fn test_task_created_over_http_runs_on_worker() {
    let cluster = start_cluster().await;
    let client = reqwest::Client::new();
    wait_for_worker(&client, cluster.api).await;

    let response = client
        .post(format!("http://{}/api/v1/tasks", cluster.api))
        .json(&json!({"name": "greet", "args": "greet.sh world", "return_type": "string"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let body = wait_for_task(&client, cluster.api, "greet", "finished").await;
    assert_eq!(body["data"]["result"], "hello world\n");

    cluster.shutdown.shutdown().await;
}

#[tokio::test]
async fn test_stop_and_restart_over_http() {
    let cluster = start_cluster().await;
    let client = reqwest::Client::new();
    wait_for_worker(&client, cluster.api).await;

    client
        .post(format!("http://{}/api/v1/tasks", cluster.api))
        .json(&json!({"name": "forever", "args": "forever.sh"}))
        .send()
        .await
        .unwrap();
    wait_for_task(&client, cluster.api, "forever", "running").await;

    let response = client
        .post(format!("http://{}/api/v1/tasks/forever/stop", cluster.api))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    wait_for_task(&client, cluster.api, "forever", "stopped").await;

    let response = client
        .post(format!("http://{}/api/v1/tasks/forever/start", cluster.api))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    wait_for_task(&client, cluster.api, "forever", "running").await;

    let response = client
        .delete(format!("http://{}/api/v1/tasks/forever", cluster.api))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let response = client
        .get(format!("http://{}/api/v1/tasks/forever", cluster.api))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    cluster.shutdown.shutdown().await;
}
