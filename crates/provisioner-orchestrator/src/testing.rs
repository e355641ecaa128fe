//! Fakes shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use provisioner_core::{FeatureFlags, RegionId, RunContext, Task};
use provisioner_worker::{WorkInvocation, Worker, WorkerError};

use crate::lifecycle::{CallbackBody, CallbackSender, LifecycleError};
use crate::scope::{DiscoveryError, RegionDiscovery};

/// Context with every optional service enabled.
pub(crate) fn context() -> RunContext {
    RunContext {
        client_name: "acme".to_string(),
        bucket: "acme-logs".to_string(),
        role_arn: Some("arn:aws:iam::123456789012:role/reader".to_string()),
        flags: FeatureFlags::new()
            .with("dns", "true")
            .with("eks", "true")
            .with("vfl", "true"),
    }
}

/// Worker whose behaviour is scripted per task.
#[derive(Default)]
pub(crate) struct ScriptedWorker {
    failing: BTreeSet<Task>,
    panicking: BTreeSet<Task>,
    sleeping: BTreeMap<Task, Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<WorkInvocation>>,
}

impl ScriptedWorker {
    /// Succeeds for every task.
    pub(crate) fn ok() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(mut self, task: Task) -> Self {
        self.failing.insert(task);
        self
    }

    pub(crate) fn panicking_on(mut self, task: Task) -> Self {
        self.panicking.insert(task);
        self
    }

    pub(crate) fn sleeping_on(mut self, task: Task, duration: Duration) -> Self {
        self.sleeping.insert(task, duration);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn invocations(&self) -> Vec<WorkInvocation> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn invoke(&self, invocation: &WorkInvocation) -> Result<Value, WorkerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(invocation.clone());
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let task = &invocation.task;
        if let Some(duration) = self.sleeping.get(task) {
            tokio::time::sleep(*duration).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(task) {
            panic!("scripted panic for {task}");
        }
        if self.failing.contains(task) {
            return Err(WorkerError::Remote(format!("AccessDenied for {task}")));
        }
        Ok(json!({ "statusCode": 200, "service": task.service, "region": task.region }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Discovery that always fails.
pub(crate) struct FailingDiscovery;

#[async_trait]
impl RegionDiscovery for FailingDiscovery {
    async fn enabled_regions(&self) -> Result<Vec<RegionId>, DiscoveryError> {
        Err(DiscoveryError::Request("connection refused".to_string()))
    }
}

/// Discovery that never answers.
pub(crate) struct HangingDiscovery;

#[async_trait]
impl RegionDiscovery for HangingDiscovery {
    async fn enabled_regions(&self) -> Result<Vec<RegionId>, DiscoveryError> {
        std::future::pending().await
    }
}

/// Callback sender that records every PUT.
#[derive(Default)]
pub(crate) struct RecordingCallbacks {
    sent: Mutex<Vec<(String, CallbackBody)>>,
    reject: AtomicBool,
}

impl RecordingCallbacks {
    /// Sender whose PUTs all fail after being recorded.
    pub(crate) fn rejecting() -> Self {
        let sender = Self::default();
        sender.reject.store(true, Ordering::SeqCst);
        sender
    }

    pub(crate) fn sent(&self) -> Vec<(String, CallbackBody)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CallbackSender for RecordingCallbacks {
    async fn send(&self, url: &str, body: &CallbackBody) -> Result<(), LifecycleError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((url.to_string(), body.clone()));
        }
        if self.reject.load(Ordering::SeqCst) {
            return Err(LifecycleError::CallbackStatus(403));
        }
        Ok(())
    }
}
