use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use taskplane_api::{create_routes, AppState};
use taskplane_core::{config::DispatcherConfig, models::TaskStatus};
use taskplane_dispatcher::{Scheduler, TaskController};

fn app() -> (Router, TaskController) {
    let controller = TaskController::new(Arc::new(Scheduler::new(DispatcherConfig::default())));
    let router = create_routes(AppState {
        controller: controller.clone(),
    });
    (router, controller)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (router, _) = app();
    let (status, body) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_create_and_list_tasks() {
    let (router, _) = app();

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/v1/tasks",
        Some(json!({"name": "build", "args": "main.py --fast", "return_type": "json"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({"status": "ok"}));

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/v1/tasks",
        Some(json!({"name": "build"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, json!({"status": "error", "message": "task already exists"}));

    let (status, body) = call(&router, Method::GET, "/api/v1/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "build");
    assert_eq!(body["data"][0]["status"], "created");
    assert_eq!(body["data"][0]["args"], "main.py --fast");

    let (status, body) = call(&router, Method::GET, "/api/v1/tasks/build", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["return_type"], "json");
}

#[tokio::test]
async fn test_control_ops_on_missing_task() {
    let (router, _) = app();
    let not_found = json!({"status": "error", "message": "task not found"});

    for (method, uri) in [
        (Method::POST, "/api/v1/tasks/missing/stop"),
        (Method::POST, "/api/v1/tasks/missing/start"),
        (Method::DELETE, "/api/v1/tasks/missing"),
    ] {
        let (status, body) = call(&router, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body, not_found, "{uri}");
    }

    let (status, _) = call(&router, Method::GET, "/api/v1/tasks/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_non_stopped_task_conflicts() {
    let (router, controller) = app();
    controller.create_task("build", "", "json").await;

    let (status, body) = call(&router, Method::POST, "/api/v1/tasks/build/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["message"],
        "you can only start a stopped task, current status is created"
    );
}

#[tokio::test]
async fn test_delete_twice() {
    let (router, controller) = app();
    controller.create_task("build", "", "json").await;

    let (status, body) = call(&router, Method::DELETE, "/api/v1/tasks/build", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
    assert!(controller.get_task("build").await.is_none());

    let (status, _) = call(&router, Method::DELETE, "/api/v1/tasks/build", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_unassigned_task_is_not_found() {
    let (router, controller) = app();
    controller.create_task("build", "", "json").await;

    let (status, body) = call(&router, Method::POST, "/api/v1/tasks/build/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"status": "error", "message": "task not found"}));
    assert_eq!(
        controller.get_task("build").await.unwrap().status,
        TaskStatus::Created
    );
}

#[tokio::test]
async fn test_list_workers_empty() {
    let (router, _) = app();
    let (status, body) = call(&router, Method::GET, "/api/v1/workers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}
