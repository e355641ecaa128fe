//! The worker contract.

use async_trait::async_trait;
use serde_json::{Map, Value};

use provisioner_core::{ParamKind, RunId, Task};

use crate::WorkerError;

/// Everything a worker needs for one task, with parameters already bound.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkInvocation {
    /// Run this task belongs to.
    pub run_id: RunId,

    /// The (service, region) pair to configure.
    pub task: Task,

    /// Client the configuration is performed for.
    pub client_name: String,

    /// Bound parameters, in the service descriptor's order.
    pub params: Vec<(ParamKind, String)>,
}

impl WorkInvocation {
    pub fn new(run_id: RunId, task: Task, client_name: impl Into<String>) -> Self {
        Self {
            run_id,
            task,
            client_name: client_name.into(),
            params: Vec::new(),
        }
    }

    /// Builder method to attach bound parameters.
    pub fn with_params(mut self, params: Vec<(ParamKind, String)>) -> Self {
        self.params = params;
        self
    }

    /// Value bound for `kind`, if the service asked for it.
    pub fn param(&self, kind: ParamKind) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_str())
    }

    /// Flat JSON payload as the region processor expects it.
    pub fn to_payload(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("service".into(), self.task.service.as_str().into());
        payload.insert("region".into(), self.task.region.as_str().into());
        payload.insert("client_name".into(), self.client_name.clone().into());
        payload.insert("run_id".into(), self.run_id.as_str().into());
        for (kind, value) in &self.params {
            payload.insert(kind.as_str().into(), value.clone().into());
        }
        Value::Object(payload)
    }
}

/// Performs one unit of configuration work.
///
/// Implementations return the remote payload on success. Any failure, whatever
/// its cause, is reported as a [`WorkerError`]; the dispatcher treats them all
/// the same way.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn invoke(&self, invocation: &WorkInvocation) -> Result<Value, WorkerError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "worker"
    }
}
