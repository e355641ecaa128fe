//! Task and TaskResult types.

use crate::{RegionId, ServiceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One unit of fan-out work: configure `service` in `region`.
///
/// Ordering is by service, then region, which is the dispatch order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Service to configure.
    pub service: ServiceId,

    /// Region to configure it in.
    pub region: RegionId,
}

impl Task {
    /// Create a new Task.
    pub fn new(service: impl Into<ServiceId>, region: impl Into<RegionId>) -> Self {
        Self {
            service: service.into(),
            region: region.into(),
        }
    }

    /// Full Cartesian product `services × regions`, sorted.
    pub fn product<'a>(
        services: impl IntoIterator<Item = &'a ServiceId>,
        regions: impl IntoIterator<Item = &'a RegionId> + Clone,
    ) -> Vec<Task> {
        let mut tasks: Vec<Task> = services
            .into_iter()
            .flat_map(|service| {
                regions
                    .clone()
                    .into_iter()
                    .map(move |region| Task::new(service.clone(), region.clone()))
            })
            .collect();
        tasks.sort();
        tasks.dedup();
        tasks
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.region)
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// Service id is not in the registry; the worker was never called.
    UnknownService,
    /// A required parameter could not be bound.
    MissingParameter,
    /// The worker call itself failed (transport, malformed response, ...).
    Invocation,
    /// The remote side answered with a non-success status.
    RemoteStatus,
    /// The worker call exceeded the per-task timeout.
    Timeout,
    /// The worker panicked.
    Panicked,
    /// The task never reported back.
    Aborted,
}

/// Structured error attached to a failed [`TaskResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Outcome of exactly one [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub service: ServiceId,
    pub region: RegionId,
    pub success: bool,

    /// Worker payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Structured error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// When the result was recorded.
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    /// Successful result carrying the worker payload.
    pub fn succeeded(task: &Task, payload: Value) -> Self {
        Self {
            service: task.service.clone(),
            region: task.region.clone(),
            success: true,
            payload: Some(payload),
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Failed result carrying a structured error.
    pub fn failed(task: &Task, error: TaskError) -> Self {
        Self {
            service: task.service.clone(),
            region: task.region.clone(),
            success: false,
            payload: None,
            error: Some(error),
            finished_at: Utc::now(),
        }
    }

    /// The task this result belongs to.
    pub fn task(&self) -> Task {
        Task::new(self.service.clone(), self.region.clone())
    }

    pub fn error_kind(&self) -> Option<TaskErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
