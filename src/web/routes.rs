//! HTTP route handlers for the web server: metrics, queue, and proxy
//! state, plus the security/stress test drivers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Extension, Json, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::metrics::HealthThresholds;
use crate::queue::{EnqueueOptions, Task};
use crate::runtime::Runtime;
use crate::security::{SecurityTestOptions, StressTestOptions};

fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/metrics/snapshot", get(get_snapshot))
        .route("/metrics/health", get(get_health))
        .route("/metrics/alerts", get(get_alerts))
        .route("/queue/stats", get(get_queue_stats))
        .route("/queue/tasks", post(enqueue_task))
        .route("/queue/tasks/bulk", post(enqueue_tasks_bulk))
        .route("/queue/pause", post(pause_queue))
        .route("/queue/resume", post(resume_queue))
        .route("/queue/drain", post(drain_queue))
        .route("/queue/obliterate", post(obliterate_queue))
        .route("/proxy/stats", get(get_proxy_stats))
        .route("/sessions/count", get(get_session_count))
        .route("/security/test", post(run_security_test))
        .route("/security/stress", post(run_stress_test))
        .layer(Extension(runtime))
}

#[derive(Deserialize)]
struct WindowQuery {
    window_secs: Option<u64>,
}

async fn get_snapshot(
    Extension(runtime): Extension<Arc<Runtime>>,
    Query(q): Query<WindowQuery>,
) -> impl IntoResponse {
    let window = Duration::from_secs(q.window_secs.unwrap_or(300));
    Json(runtime.metrics.snapshot(window))
}

async fn get_health(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    Json(runtime.metrics.health(&HealthThresholds::default()))
}

async fn get_alerts(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    Json(runtime.metrics.alerting.recent())
}

async fn get_queue_stats(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    Json(runtime.queue.stats())
}

#[derive(Deserialize)]
struct EnqueueRequest {
    task: Task,
    #[serde(default)]
    options: EnqueueOptions,
}

async fn enqueue_task(
    Extension(runtime): Extension<Arc<Runtime>>,
    Json(req): Json<EnqueueRequest>,
) -> impl IntoResponse {
    match runtime.enqueue(req.task, req.options) {
        Ok(id) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => err_response(StatusCode::CONFLICT, &e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct BulkEnqueueRequest {
    tasks: Vec<(Task, EnqueueOptions)>,
}

async fn enqueue_tasks_bulk(
    Extension(runtime): Extension<Arc<Runtime>>,
    Json(req): Json<BulkEnqueueRequest>,
) -> impl IntoResponse {
    match runtime.queue.enqueue_bulk(req.tasks) {
        Ok(ids) => Json(serde_json::json!({ "ids": ids })).into_response(),
        Err(e) => err_response(StatusCode::CONFLICT, &e.to_string()).into_response(),
    }
}

async fn pause_queue(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    runtime.queue.pause();
    StatusCode::OK
}

async fn resume_queue(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    runtime.queue.resume();
    StatusCode::OK
}

async fn drain_queue(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    runtime.queue.drain();
    StatusCode::OK
}

async fn obliterate_queue(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    runtime.queue.obliterate();
    StatusCode::OK
}

async fn get_proxy_stats(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    let stats = runtime.proxies.as_ref().map(|pool| pool.stats());
    Json(stats)
}

async fn get_session_count(Extension(runtime): Extension<Arc<Runtime>>) -> impl IntoResponse {
    Json(serde_json::json!({ "active": runtime.sessions.len().await }))
}

async fn run_security_test(
    Extension(runtime): Extension<Arc<Runtime>>,
    Json(opts): Json<SecurityTestOptions>,
) -> impl IntoResponse {
    info!(url = %opts.url, "running security test via web API");
    match runtime.run_security_test(opts).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    }
}

async fn run_stress_test(
    Extension(runtime): Extension<Arc<Runtime>>,
    Json(opts): Json<StressTestOptions>,
) -> impl IntoResponse {
    info!(url = %opts.url, "running stress test via web API");
    match runtime.run_stress_test(opts).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    }
}
