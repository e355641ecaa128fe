//! Worker that invokes the remote region processor over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::classify::classify_error_message;
use crate::{WorkInvocation, Worker, WorkerError};

/// Longest remote body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Invokes the region processor endpoint with one task's payload.
///
/// `200` answers carry the processor's result (optionally wrapped in a
/// `{statusCode, body}` envelope); `202` means the processor accepted the work
/// asynchronously. Anything else is a failure unless the error text says the
/// resource is already configured.
#[derive(Clone)]
pub struct HttpWorker {
    inner: reqwest::Client,
    endpoint: String,
}

impl HttpWorker {
    /// Create a new HTTP worker.
    pub fn new(endpoint: &str) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Create a worker whose requests give up after `timeout`.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Create a worker from an existing client.
    pub fn with_client(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            inner: client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Worker for HttpWorker {
    async fn invoke(&self, invocation: &WorkInvocation) -> Result<Value, WorkerError> {
        let task = &invocation.task;
        debug!(
            url = %self.endpoint,
            service = %task.service,
            region = %task.region,
            "POST region processor"
        );

        let response = self
            .inner
            .post(&self.endpoint)
            .json(&invocation.to_payload())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        let result = interpret_response(status, &body);
        match &result {
            Ok(_) => info!(
                service = %task.service,
                region = %task.region,
                status,
                "Region processor invoked"
            ),
            Err(e) => warn!(
                service = %task.service,
                region = %task.region,
                status,
                error = %e,
                "Region processor invocation failed"
            ),
        }
        result
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Map an HTTP answer from the region processor to a worker result.
fn interpret_response(status: u16, body: &str) -> Result<Value, WorkerError> {
    match status {
        202 => Ok(json!({ "status": "invoked_async" })),
        200..=299 => unwrap_envelope(parse_body(body)?),
        _ if classify_error_message(body).is_benign() => Ok(already_configured(body)),
        _ => Err(WorkerError::RemoteStatus {
            status,
            body: truncate(body),
        }),
    }
}

fn parse_body(body: &str) -> Result<Value, WorkerError> {
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_str(body)?)
}

/// Unwrap a `{statusCode, body}` envelope if the processor used one.
fn unwrap_envelope(value: Value) -> Result<Value, WorkerError> {
    let Some(code) = value.get("statusCode").and_then(Value::as_u64) else {
        return check_reported_failure(value);
    };

    let inner = match value.get("body") {
        Some(Value::String(s)) => parse_body(s)?,
        Some(other) => other.clone(),
        None => json!({}),
    };

    match code {
        200 | 202 => check_reported_failure(inner),
        _ => {
            let text = inner.to_string();
            if classify_error_message(&text).is_benign() {
                Ok(already_configured(&text))
            } else {
                Err(WorkerError::RemoteStatus {
                    status: u16::try_from(code).unwrap_or(u16::MAX),
                    body: truncate(&text),
                })
            }
        }
    }
}

/// A `200` can still carry `{"success": false, "error": ...}`.
fn check_reported_failure(value: Value) -> Result<Value, WorkerError> {
    if value.get("success") != Some(&Value::Bool(false)) {
        return Ok(value);
    }

    let message = match value.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unspecified error".to_string(),
    };

    if classify_error_message(&message).is_benign() {
        Ok(already_configured(&message))
    } else {
        Err(WorkerError::Remote(message))
    }
}

fn already_configured(detail: &str) -> Value {
    json!({ "status": "already_configured", "detail": truncate(detail) })
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
