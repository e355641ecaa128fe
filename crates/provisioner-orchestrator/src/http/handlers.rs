//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::orchestrator::InvocationContext;
use crate::state::AppState;

/// Headers a caller may use to describe the invocation.
const FUNCTION_ARN_HEADER: &str = "x-function-arn";
const LOG_STREAM_HEADER: &str = "x-log-stream-name";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Run one invocation. The HTTP status mirrors the response's `statusCode`.
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let ctx = InvocationContext {
        function_arn: header_value(&headers, FUNCTION_ARN_HEADER),
        log_stream_name: header_value(&headers, LOG_STREAM_HEADER),
        request_id: header_value(&headers, REQUEST_ID_HEADER),
    };

    let response = state.orchestrator.handle(&payload, &ctx).await;
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = Utc::now() - state.started_at;
    Json(json!({ "status": "ok", "uptime_seconds": uptime.num_seconds() }))
}

/// Prometheus metrics endpoint.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
