//! Prometheus metrics endpoint and HTTP request tracking middleware.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HOOK_EXECUTIONS_TOTAL: &str = "hook_executions_total";
pub const HOOK_EXECUTION_DURATION_SECONDS: &str = "hook_execution_duration_seconds";
pub const GIT_COMMANDS_TOTAL: &str = "git_commands_total";
pub const PROJECTS_TOTAL: &str = "projects_total";
pub const EVENT_BUS_SUBSCRIBERS: &str = "event_bus_subscribers";

/// Install the Prometheus recorder and register metric descriptions. Call
/// once during startup.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_counter!(
        HOOK_EXECUTIONS_TOTAL,
        "Total number of hook invocations by hook id and outcome"
    );
    describe_histogram!(
        HOOK_EXECUTION_DURATION_SECONDS,
        "Hook command execution duration in seconds"
    );
    describe_counter!(GIT_COMMANDS_TOTAL, "Total number of git commands run, by operation and outcome");
    describe_gauge!(PROJECTS_TOTAL, "Total number of registered projects");
    describe_gauge!(EVENT_BUS_SUBSCRIBERS, "Current number of live event stream subscribers");

    handle
}

pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "metrics not initialized".to_string()),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM projects")
        .fetch_one(&state.db)
        .await
    {
        gauge!(PROJECTS_TOTAL).set(count as f64);
    }
}

pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_hook_execution(hook_id: &str, success: bool, duration_secs: f64) {
    let outcome = if success { "success" } else { "failure" };
    counter!(HOOK_EXECUTIONS_TOTAL, "hook_id" => hook_id.to_string(), "outcome" => outcome).increment(1);
    histogram!(HOOK_EXECUTION_DURATION_SECONDS, "hook_id" => hook_id.to_string()).record(duration_secs);
}

pub fn record_git_command(operation: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(GIT_COMMANDS_TOTAL, "operation" => operation.to_string(), "outcome" => outcome).increment(1);
}

pub fn set_event_bus_subscribers(count: usize) {
    gauge!(EVENT_BUS_SUBSCRIBERS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_follow_prometheus_conventions() {
        assert!(HTTP_REQUESTS_TOTAL.contains("_total"));
        assert!(HOOK_EXECUTIONS_TOTAL.contains("_total"));
        assert!(HTTP_REQUEST_DURATION_SECONDS.contains("_seconds"));
    }
}
