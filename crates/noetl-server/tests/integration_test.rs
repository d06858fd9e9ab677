//! Integration tests for the `noetl-server` REST surface. Run entirely
//! in-process against an `InMemoryStore`-backed router via
//! `tower::ServiceExt::oneshot`: no live database or listening server is
//! required.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use noetl_core::{Event, EventType, Status, Value};
use noetl_engine::broker::Outcome;
use noetl_engine::persistence::InMemoryStore;
use noetl_engine::playbook::FsPlaybookCatalog;
use noetl_server::scheduler::Scheduler;
use noetl_server::{api, AppState};
use serde_json::json;
use tower::ServiceExt;

/// A scheduler that never actually runs the broker, keeping these tests
/// scoped to the REST contract rather than end-to-end orchestration
/// behavior (covered by `noetl-engine`'s own broker tests).
struct NoopScheduler;

#[async_trait]
impl Scheduler for NoopScheduler {
    fn schedule_evaluation(&self, _execution_id: String) {}

    async fn evaluate_now(&self, _execution_id: &str) -> Outcome {
        Outcome::Stalled("noop scheduler".to_string())
    }
}

fn test_state() -> AppState {
    let store = Arc::new(InMemoryStore::new());
    AppState {
        events: store.clone(),
        queue: store.clone(),
        tables: store,
        catalog: Arc::new(FsPlaybookCatalog::new(std::env::temp_dir().join("noetl-test-catalog"))),
        scheduler: Arc::new(NoopScheduler),
        inline_aggregation_max: 50,
    }
}

fn start_event(execution_id: &str) -> Event {
    let mut workload = Value::map();
    workload.insert("n", Value::Int(5));

    let mut input_context = Value::map();
    input_context.insert("path", Value::String("orders/process".to_string()));
    input_context.insert("version", Value::String("latest".to_string()));
    input_context.insert("workload", workload);

    Event {
        event_id: noetl_core::new_event_id(),
        parent_event_id: None,
        execution_id: execution_id.to_string(),
        parent_execution_id: None,
        timestamp: chrono::Utc::now(),
        insertion_rank: 0,
        event_type: EventType::new(EventType::EXECUTION_START),
        status: Status::Pending,
        node_id: None,
        node_name: None,
        node_type: None,
        input_context: Some(input_context),
        output_result: None,
        metadata: None,
        loop_fields: Default::default(),
        error: None,
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn emit_and_list_events_round_trip() {
    let app = api::routes(test_state());
    let execution_id = noetl_core::new_execution_id();
    let event = start_event(&execution_id);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/events/by-execution/{execution_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let events = body["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["execution_id"], execution_id);
}

#[tokio::test]
async fn list_executions_reflects_started_executions() {
    let app = api::routes(test_state());
    let execution_id = noetl_core::new_execution_id();
    let event = start_event(&execution_id);

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(Request::builder().uri("/executions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let rows = body.as_array().unwrap();
    assert!(rows.iter().any(|r| r["execution_id"] == execution_id));
}

#[tokio::test]
async fn get_execution_404s_for_unknown_id() {
    let app = api::routes(test_state());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/executions/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn enqueue_lease_and_complete_flow() {
    let app = api::routes(test_state());

    let enqueue_body = json!({
        "execution_id": "exec-1",
        "node_id": "step-a",
        "action": {"type": "noop"},
        "context": {},
        "priority": 0,
        "max_attempts": 3,
        "available_at": chrono::Utc::now().to_rfc3339(),
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/queue/enqueue")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&enqueue_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let queue_id = body["id"].as_i64().unwrap();

    let lease_body = json!({"worker_id": "worker-1", "lease_seconds": 60});
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/queue/lease")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&lease_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["job"]["queue_id"].as_i64().unwrap(), queue_id);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/queue/{queue_id}/complete"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/queue?status=done")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let jobs = body.as_array().unwrap();
    assert!(jobs.iter().any(|j| j["queue_id"].as_i64() == Some(queue_id)));
}

#[tokio::test]
async fn context_render_rejects_unknown_execution() {
    let app = api::routes(test_state());
    let body = json!({
        "execution_id": "does-not-exist",
        "template": "{{ workload.n }}",
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/context/render")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn context_render_renders_against_rebuilt_context() {
    let app = api::routes(test_state());
    let execution_id = noetl_core::new_execution_id();
    let event = start_event(&execution_id);

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let body = json!({
        "execution_id": execution_id,
        "template": "{{ n }}",
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/context/render")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rendered"], json!(5));
}

#[tokio::test]
async fn loop_results_empty_for_unknown_step() {
    let app = api::routes(test_state());
    let execution_id = noetl_core::new_execution_id();
    let event = start_event(&execution_id);

    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&event).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/aggregate/loop/results?execution_id={execution_id}&step_name=missing"
                ))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], 0);
}
