//! Entry router - classifies a raw invocation payload.

use serde_json::Value;
use thiserror::Error;

use provisioner_core::{EventKind, Task};

use crate::lifecycle::LifecycleEvent;

/// Marker the timer service puts in `source`.
pub const SCHEDULED_SOURCE: &str = "aws.events";

/// Fields every lifecycle event must carry beyond `RequestType` and `StackId`.
const LIFECYCLE_REQUIRED: [&str; 3] = ["RequestId", "LogicalResourceId", "ResponseURL"];

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Malformed event: {0}")]
    Malformed(String),
}

/// A classified invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    Lifecycle(LifecycleEvent),
    Scheduled,
    SingleTask(Task),
    Direct,
}

impl Invocation {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Lifecycle(_) => EventKind::Lifecycle,
            Self::Scheduled => EventKind::Scheduled,
            Self::SingleTask(_) => EventKind::SingleTask,
            Self::Direct => EventKind::Direct,
        }
    }
}

/// Classify `payload`. Side-effect free; anything unrecognised is `Direct`.
pub fn classify(payload: &Value) -> Result<Invocation, RouterError> {
    let Some(fields) = payload.as_object() else {
        return Ok(Invocation::Direct);
    };

    if fields.contains_key("RequestType") && fields.contains_key("StackId") {
        for name in LIFECYCLE_REQUIRED {
            if !has_text(payload, name) {
                return Err(RouterError::MissingParameter(name));
            }
        }
        let event = serde_json::from_value(payload.clone())
            .map_err(|e| RouterError::Malformed(e.to_string()))?;
        return Ok(Invocation::Lifecycle(event));
    }

    if payload.get("source").and_then(Value::as_str) == Some(SCHEDULED_SOURCE) {
        return Ok(Invocation::Scheduled);
    }

    if let Some(service) = fields.get("service") {
        let service = service
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .ok_or(RouterError::MissingParameter("service"))?;
        let region = payload
            .get("region")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or(RouterError::MissingParameter("region"))?;
        return Ok(Invocation::SingleTask(Task::new(service, region)));
    }

    Ok(Invocation::Direct)
}

fn has_text(payload: &Value, name: &str) -> bool {
    payload
        .get(name)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty())
}
