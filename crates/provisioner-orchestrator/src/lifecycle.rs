//! Lifecycle event responder.
//!
//! The lifecycle protocol waits for exactly one terminal callback per event.
//! [`LifecycleResponder::respond`] computes an [`Outcome`] on a single path that
//! turns every error, including a panicking run, into a FAILED outcome, and
//! only then spends the event's [`TerminalCallback`]. The callback is consumed
//! by `send`, so a second callback for the same event does not type-check.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use provisioner_core::{CallbackStatus, RunReport};

/// Reason sent for Delete events.
pub const DELETE_REASON: &str = "Delete operation completed";

/// Lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("callback request failed: {0}")]
    Callback(String),

    #[error("callback rejected with status {0}")]
    CallbackStatus(u16),

    #[error("callback body could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for LifecycleError {
    fn from(e: reqwest::Error) -> Self {
        Self::Callback(e.to_string())
    }
}

/// Lifecycle request type. Unknown values are kept verbatim; a non-string
/// value is kept as its JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "String")]
pub enum RequestType {
    Create,
    Update,
    Delete,
    Other(String),
}

impl From<String> for RequestType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            _ => Self::Other(value),
        }
    }
}

impl From<Value> for RequestType {
    fn from(value: Value) -> Self {
        match value {
            Value::String(value) => value.into(),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<RequestType> for String {
    fn from(value: RequestType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("Create"),
            Self::Update => f.write_str("Update"),
            Self::Delete => f.write_str("Delete"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Inbound lifecycle notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleEvent {
    pub request_type: RequestType,

    #[serde(deserialize_with = "lenient_string")]
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,

    /// Presigned URL the terminal callback is PUT to.
    #[serde(rename = "ResponseURL")]
    pub response_url: String,

    /// Present on Update and Delete.
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub physical_resource_id: Option<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub resource_properties: Value,
}

/// Any JSON value as a string; non-strings keep their JSON text.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        other => other.to_string(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(value) => Some(value),
        other => Some(other.to_string()),
    })
}

/// Body of the terminal callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallbackBody {
    pub status: CallbackStatus,
    pub reason: String,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    pub no_echo: bool,
    pub data: Value,
}

/// Delivers terminal callbacks.
#[async_trait]
pub trait CallbackSender: Send + Sync {
    async fn send(&self, url: &str, body: &CallbackBody) -> Result<(), LifecycleError>;
}

/// PUTs the callback body to the presigned response URL.
pub struct HttpCallbackSender {
    inner: reqwest::Client,
}

impl HttpCallbackSender {
    /// Create a sender whose PUTs give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, LifecycleError> {
        let inner = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { inner })
    }
}

#[async_trait]
impl CallbackSender for HttpCallbackSender {
    async fn send(&self, url: &str, body: &CallbackBody) -> Result<(), LifecycleError> {
        let payload = serde_json::to_vec(body)?;
        // Presigned URLs are signed without a content type.
        let response = self
            .inner
            .put(url)
            .header(CONTENT_TYPE, "")
            .header(CONTENT_LENGTH, payload.len())
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(LifecycleError::CallbackStatus(status.as_u16()));
        }
        Ok(())
    }
}

/// The one callback an event is owed. Spent by [`TerminalCallback::send`].
pub struct TerminalCallback {
    sender: Arc<dyn CallbackSender>,
    url: String,
    stack_id: String,
    request_id: String,
    logical_resource_id: String,
    physical_resource_id: String,
}

impl TerminalCallback {
    pub fn new(sender: Arc<dyn CallbackSender>, event: &LifecycleEvent, physical_resource_id: String) -> Self {
        Self {
            sender,
            url: event.response_url.clone(),
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            physical_resource_id,
        }
    }

    /// Send the terminal callback. Not retried: a retry could deliver a second
    /// terminal response.
    pub async fn send(self, outcome: &Outcome) -> Result<CallbackBody, LifecycleError> {
        let body = CallbackBody {
            status: outcome.status,
            reason: outcome.reason.clone(),
            physical_resource_id: self.physical_resource_id,
            stack_id: self.stack_id,
            request_id: self.request_id,
            logical_resource_id: self.logical_resource_id,
            no_echo: false,
            data: outcome.data.clone(),
        };

        match self.sender.send(&self.url, &body).await {
            Ok(()) => {
                info!(
                    request_id = %body.request_id,
                    status = %body.status,
                    reason = %body.reason,
                    "Lifecycle callback sent"
                );
                Ok(body)
            }
            Err(e) => {
                error!(
                    request_id = %body.request_id,
                    status = %body.status,
                    error = %e,
                    "Lifecycle callback failed"
                );
                Err(e)
            }
        }
    }
}

/// Verdict for one lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub status: CallbackStatus,
    pub reason: String,
    pub data: Value,
}

impl Outcome {
    pub fn success(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: CallbackStatus::Success,
            data: json!({ "message": reason }),
            reason,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: CallbackStatus::Failed,
            data: json!({ "message": reason }),
            reason,
        }
    }
}

/// What [`LifecycleResponder::respond`] did.
#[derive(Debug, Clone, Serialize)]
pub struct Responded {
    pub outcome: Outcome,

    /// The run report, for Create and Update events whose run completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

/// Turns lifecycle events into exactly one terminal callback.
pub struct LifecycleResponder {
    sender: Arc<dyn CallbackSender>,
    threshold: f64,
}

impl LifecycleResponder {
    pub fn new(sender: Arc<dyn CallbackSender>, threshold: f64) -> Self {
        Self { sender, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Handle one event. `run` performs the provisioning run for Create and
    /// Update; it is not called for any other request type.
    ///
    /// Exactly one callback is attempted whatever `run` does. The error case
    /// means that callback could not be delivered.
    pub async fn respond<F, Fut, E>(
        &self,
        event: &LifecycleEvent,
        physical_resource_id: String,
        run: F,
    ) -> Result<Responded, LifecycleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RunReport, E>>,
        E: fmt::Display,
    {
        let callback = TerminalCallback::new(self.sender.clone(), event, physical_resource_id);
        info!(
            request_type = %event.request_type,
            request_id = %event.request_id,
            logical_resource_id = %event.logical_resource_id,
            "Handling lifecycle event"
        );

        let (outcome, report) = match &event.request_type {
            RequestType::Create | RequestType::Update => {
                match AssertUnwindSafe(async move { run().await })
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(report)) => (self.evaluate(&report), Some(report)),
                    Ok(Err(e)) => {
                        warn!(request_id = %event.request_id, error = %e, "Provisioning run failed");
                        (Outcome::failed(e.to_string()), None)
                    }
                    Err(_) => {
                        error!(request_id = %event.request_id, "Provisioning run panicked");
                        (Outcome::failed("Provisioning run panicked"), None)
                    }
                }
            }
            RequestType::Delete => (Outcome::success(DELETE_REASON), None),
            RequestType::Other(other) => {
                warn!(request_type = %other, "Unsupported lifecycle request type");
                (Outcome::failed(format!("Unsupported request type: {other}")), None)
            }
        };

        callback.send(&outcome).await?;
        Ok(Responded { outcome, report })
    }

    /// Map a run report to a callback outcome using the success threshold.
    pub fn evaluate(&self, report: &RunReport) -> Outcome {
        let (status, message) = if report.meets_threshold(self.threshold) {
            (
                CallbackStatus::Success,
                format!(
                    "Success: {}/{} tasks completed",
                    report.successful, report.total_tasks
                ),
            )
        } else {
            (
                CallbackStatus::Failed,
                format!(
                    "Failed: Only {}/{} tasks completed ({}% success rate)",
                    report.successful,
                    report.total_tasks,
                    report.success_percent()
                ),
            )
        };

        Outcome {
            status,
            data: json!({
                "message": message,
                "total_tasks": report.total_tasks,
                "successful": report.successful,
                "failed": report.failed,
                "success_rate": report.success_rate,
            }),
            reason: message,
        }
    }
}
