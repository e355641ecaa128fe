//! Invocation entry point.
//!
//! Ties the router, scope resolver, dispatcher and lifecycle responder together
//! and converts every outcome into an [`InvocationResponse`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use provisioner_core::{EventKind, RegionId, RunId, RunReport, Task};
use provisioner_worker::{HttpWorker, RetryingWorker, Worker, WorkerError};

use crate::config::{Config, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::lifecycle::{
    HttpCallbackSender, LifecycleError, LifecycleEvent, LifecycleResponder, Responded,
};
use crate::metrics::Metrics;
use crate::registry::{RegistryError, ServiceRegistry};
use crate::router::{classify, Invocation, RouterError};
use crate::scope::{
    DiscoveryError, HttpRegionDiscovery, RegionDiscovery, Scope, ScopeResolver, StaticRegions,
};

/// Errors surfaced as a non-200 invocation response.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl OrchestratorError {
    /// `400` for problems with the request, `500` for everything else.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Router(_) => 400,
            Self::Registry(RegistryError::UnknownService(_))
            | Self::Registry(RegistryError::MissingParameter { .. }) => 400,
            _ => 500,
        }
    }

    /// Short error class for responses and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Router(RouterError::MissingParameter(_)) => "MissingParameter",
            Self::Router(RouterError::Malformed(_)) => "MalformedEvent",
            Self::Registry(RegistryError::UnknownService(_)) => "UnknownService",
            Self::Registry(RegistryError::MissingParameter { .. }) => "MissingParameter",
            Self::Registry(RegistryError::DuplicateService(_)) => "DuplicateService",
            Self::Lifecycle(_) => "CallbackFailed",
            Self::Config(_) => "ConfigurationError",
            Self::Discovery(_) => "DiscoveryError",
            Self::Worker(_) => "WorkerError",
            Self::Encode(_) => "InternalError",
        }
    }
}

/// Facts about the invocation supplied by the hosting runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationContext {
    /// ARN of the running function; its region is the current region.
    pub function_arn: Option<String>,

    /// Log stream of this invocation, used as the default physical resource id.
    pub log_stream_name: Option<String>,

    pub request_id: Option<String>,
}

/// Result of one invocation: a status code and a JSON-encoded body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl InvocationResponse {
    pub fn new(status_code: u16, body: &Value) -> Self {
        Self {
            status_code,
            body: Some(body.to_string()),
        }
    }

    /// Decode the body back into JSON.
    pub fn body_json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_str(body).ok())
    }
}

/// Handles invocations end to end.
pub struct Orchestrator {
    resolver: ScopeResolver,
    dispatcher: Dispatcher,
    responder: LifecycleResponder,
    metrics: Arc<Metrics>,
    fallback_region: RegionId,
}

impl Orchestrator {
    pub fn new(
        resolver: ScopeResolver,
        dispatcher: Dispatcher,
        responder: LifecycleResponder,
        fallback_region: RegionId,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            responder,
            metrics: Arc::new(Metrics::new()),
            fallback_region,
        }
    }

    /// Wire the production collaborators from configuration.
    ///
    /// Fails if a service the configuration enables needs a parameter the
    /// configuration does not provide.
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let http = HttpWorker::with_timeout(&config.region_processor_url, config.task_timeout)?;
        let worker: Arc<dyn Worker> = if config.worker_max_attempts > 1 {
            Arc::new(RetryingWorker::new(http, config.retry_policy()))
        } else {
            Arc::new(http)
        };

        let discovery: Arc<dyn RegionDiscovery> = match &config.regions_url {
            Some(url) => Arc::new(HttpRegionDiscovery::new(url, config.discovery_timeout)?),
            None if !config.static_regions.is_empty() => {
                Arc::new(StaticRegions::new(config.static_regions.clone()))
            }
            None => Arc::new(StaticRegions::new([config.fallback_region.clone()])),
        };

        let ctx = Arc::new(config.run_context());
        let registry = Arc::new(ServiceRegistry::standard(worker));
        let resolver = ScopeResolver::new(discovery, config.scope_settings());
        registry.validate(&ctx, &resolver.resolve_services())?;

        let dispatcher = Dispatcher::new(registry, ctx, config.dispatch_config());
        let sender = HttpCallbackSender::new(config.callback_timeout)?;
        let responder = LifecycleResponder::new(Arc::new(sender), config.success_threshold);

        info!(
            client = %config.client_name,
            processor = %config.region_processor_url,
            max_concurrency = config.max_concurrency,
            threshold = config.success_threshold,
            "Orchestrator configured"
        );
        Ok(Self::new(
            resolver,
            dispatcher,
            responder,
            config.fallback_region.clone(),
        ))
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Handle one raw invocation payload. Never fails; errors become non-200
    /// responses.
    pub async fn handle(&self, payload: &Value, ctx: &InvocationContext) -> InvocationResponse {
        let invocation = match classify(payload) {
            Ok(invocation) => invocation,
            Err(e) => return self.error_response(None, e.into()),
        };
        let kind = invocation.kind();
        self.metrics.record_invocation(kind);
        info!(
            event_type = %kind,
            request_id = ctx.request_id.as_deref().unwrap_or("-"),
            "Processing invocation"
        );

        match self.run(invocation, ctx).await {
            Ok(body) => InvocationResponse::new(200, &body),
            Err(e) => self.error_response(Some(kind), e),
        }
    }

    /// Execute a classified invocation and return the response body.
    pub async fn run(
        &self,
        invocation: Invocation,
        ctx: &InvocationContext,
    ) -> Result<Value, OrchestratorError> {
        match invocation {
            Invocation::Lifecycle(event) => {
                let responded = self.respond_lifecycle(&event, ctx).await?;
                Ok(serde_json::to_value(responded)?)
            }
            Invocation::Scheduled | Invocation::Direct => {
                let report = self.process_all(ctx).await?;
                Ok(serde_json::to_value(report)?)
            }
            Invocation::SingleTask(task) => {
                let report = self.process_task(task).await?;
                Ok(serde_json::to_value(report)?)
            }
        }
    }

    /// Resolve the full scope and dispatch it.
    pub async fn process_all(&self, ctx: &InvocationContext) -> Result<RunReport, OrchestratorError> {
        let current = self.current_region(ctx);
        let scope = self.resolver.resolve(&current).await;
        self.process(scope).await
    }

    /// Dispatch a single (service, region) task through the same path.
    pub async fn process_task(&self, task: Task) -> Result<RunReport, OrchestratorError> {
        self.process(Scope::single(task)).await
    }

    async fn process(&self, scope: Scope) -> Result<RunReport, OrchestratorError> {
        self.dispatcher
            .registry()
            .validate(self.dispatcher.context(), &scope.services)?;

        let report = self.dispatcher.dispatch_run(RunId::generate(), &scope).await;
        self.metrics.record_report(&report);
        Ok(report)
    }

    async fn respond_lifecycle(
        &self,
        event: &LifecycleEvent,
        ctx: &InvocationContext,
    ) -> Result<Responded, OrchestratorError> {
        let physical_resource_id = event
            .physical_resource_id
            .clone()
            .or_else(|| ctx.log_stream_name.clone())
            .unwrap_or_else(|| format!("{}-service-manager", self.dispatcher.context().client_name));

        let responded = self
            .responder
            .respond(event, physical_resource_id, || self.process_all(ctx))
            .await?;
        Ok(responded)
    }

    fn current_region(&self, ctx: &InvocationContext) -> RegionId {
        ctx.function_arn
            .as_deref()
            .and_then(RegionId::from_function_arn)
            .unwrap_or_else(|| self.fallback_region.clone())
    }

    fn error_response(&self, kind: Option<EventKind>, e: OrchestratorError) -> InvocationResponse {
        let error_type = e.error_type();
        self.metrics.record_error(error_type);
        error!(
            event_type = kind.map(|k| k.as_str()).unwrap_or("Unknown"),
            error_type,
            error = %e,
            "Invocation failed"
        );

        InvocationResponse::new(
            e.status_code(),
            &json!({
                "success": false,
                "error": e.to_string(),
                "error_type": error_type,
                "timestamp": Utc::now().to_rfc3339(),
                "event_type": kind.map(|k| k.as_str()),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatchConfig;
    use crate::scope::ScopeSettings;
    use crate::testing::{context, RecordingCallbacks, ScriptedWorker};
    use provisioner_core::{CallbackStatus, FlagPolicy, RunContext};
    use std::collections::BTreeSet;
    use std::time::Duration;

    struct Harness {
        orchestrator: Orchestrator,
        worker: Arc<ScriptedWorker>,
        callbacks: Arc<RecordingCallbacks>,
    }

    fn harness(worker: ScriptedWorker, callbacks: RecordingCallbacks) -> Harness {
        harness_with(context(), worker, callbacks)
    }

    fn harness_with(ctx: RunContext, worker: ScriptedWorker, callbacks: RecordingCallbacks) -> Harness {
        let worker = Arc::new(worker);
        let callbacks = Arc::new(callbacks);

        let resolver = ScopeResolver::new(
            Arc::new(StaticRegions::new(["us-east-1", "eu-west-1"].map(RegionId::from))),
            ScopeSettings {
                flags: ctx.flags.clone(),
                flag_policy: FlagPolicy::Permissive,
                include_baseline: true,
                excluded_regions: BTreeSet::new(),
                discovery_timeout: Duration::from_secs(10),
            },
        );
        let dispatcher = Dispatcher::new(
            Arc::new(ServiceRegistry::standard(worker.clone())),
            Arc::new(ctx),
            DispatchConfig {
                invocation_delay: Duration::ZERO,
                ..DispatchConfig::default()
            },
        );
        let responder = LifecycleResponder::new(callbacks.clone(), 0.8);

        Harness {
            orchestrator: Orchestrator::new(resolver, dispatcher, responder, RegionId::new("us-east-1")),
            worker,
            callbacks,
        }
    }

    fn invocation_ctx() -> InvocationContext {
        InvocationContext {
            function_arn: Some("arn:aws:lambda:eu-west-1:123456789012:function:acme-sm".into()),
            log_stream_name: Some("2026/10/18/[$LATEST]abc".into()),
            request_id: Some("inv-1".into()),
        }
    }

    fn lifecycle(request_type: &str) -> Value {
        json!({
            "RequestType": request_type,
            "StackId": "arn:aws:cloudformation:eu-west-1:1:stack/acme/guid",
            "RequestId": "req-1",
            "LogicalResourceId": "ServiceManager",
            "ResponseURL": "https://callbacks.example/presigned"
        })
    }

    #[tokio::test]
    async fn test_direct_invocation_runs_full_scope() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());

        let response = h.orchestrator.handle(&json!({}), &invocation_ctx()).await;

        assert_eq!(response.status_code, 200);
        let body = response.body_json().unwrap();
        // 4 services × 2 regions
        assert_eq!(body["total_tasks"], json!(8));
        assert_eq!(body["success_rate"], json!(1.0));
        assert_eq!(h.worker.calls(), 8);
        assert!(h.callbacks.sent().is_empty());
        assert_eq!(h.orchestrator.metrics().invocations(EventKind::Direct), 1);
    }

    #[tokio::test]
    async fn test_scheduled_invocation() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());

        let response = h
            .orchestrator
            .handle(&json!({ "source": "aws.events" }), &invocation_ctx())
            .await;

        assert_eq!(response.status_code, 200);
        assert_eq!(h.orchestrator.metrics().invocations(EventKind::Scheduled), 1);
    }

    #[tokio::test]
    async fn test_single_task_invocation() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());

        let response = h
            .orchestrator
            .handle(&json!({ "service": "dns", "region": "ap-south-1" }), &invocation_ctx())
            .await;

        let body = response.body_json().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(body["total_tasks"], json!(1));
        assert_eq!(body["results"][0]["region"], json!("ap-south-1"));
    }

    #[tokio::test]
    async fn test_single_unknown_service_never_calls_worker() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());

        let response = h
            .orchestrator
            .handle(&json!({ "service": "foo", "region": "us-east-1" }), &invocation_ctx())
            .await;

        let body = response.body_json().unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(body["failed"], json!(1));
        assert_eq!(body["results"][0]["error"]["kind"], json!("unknown_service"));
        assert_eq!(h.worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_create_sends_one_callback() {
        let h = harness(
            ScriptedWorker::ok().failing_on(Task::new("dns", "eu-west-1")),
            RecordingCallbacks::default(),
        );

        let response = h.orchestrator.handle(&lifecycle("Create"), &invocation_ctx()).await;

        assert_eq!(response.status_code, 200);
        let sent = h.callbacks.sent();
        assert_eq!(sent.len(), 1);
        let body = &sent[0].1;
        // 7/8 = 0.875 clears the threshold
        assert_eq!(body.status, CallbackStatus::Success);
        assert_eq!(body.reason, "Success: 7/8 tasks completed");
        assert_eq!(body.physical_resource_id, "2026/10/18/[$LATEST]abc");
    }

    #[tokio::test]
    async fn test_lifecycle_physical_id_defaults_to_client() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());

        h.orchestrator
            .handle(&lifecycle("Delete"), &InvocationContext::default())
            .await;

        let sent = h.callbacks.sent();
        assert_eq!(sent[0].1.physical_resource_id, "acme-service-manager");
        assert_eq!(h.worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_missing_field_is_rejected_without_callback() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());
        let mut payload = lifecycle("Create");
        payload.as_object_mut().unwrap().remove("ResponseURL");

        let response = h.orchestrator.handle(&payload, &invocation_ctx()).await;

        assert_eq!(response.status_code, 400);
        let body = response.body_json().unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error_type"], json!("MissingParameter"));
        assert!(body["timestamp"].is_string());
        assert!(h.callbacks.sent().is_empty());
        assert_eq!(h.orchestrator.metrics().errors("MissingParameter"), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_callback_failure_is_500() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::rejecting());

        let response = h.orchestrator.handle(&lifecycle("Delete"), &invocation_ctx()).await;

        assert_eq!(response.status_code, 500);
        assert_eq!(response.body_json().unwrap()["error_type"], json!("CallbackFailed"));
        assert_eq!(h.callbacks.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_role_is_rejected_before_dispatch() {
        let mut ctx = context();
        ctx.role_arn = None;
        let h = harness_with(ctx, ScriptedWorker::ok(), RecordingCallbacks::default());

        let response = h.orchestrator.handle(&json!({}), &invocation_ctx()).await;

        assert_eq!(response.status_code, 400);
        assert_eq!(response.body_json().unwrap()["error_type"], json!("MissingParameter"));
        assert_eq!(h.worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_with_non_string_type_gets_failed_callback() {
        let h = harness(ScriptedWorker::ok(), RecordingCallbacks::default());
        let mut payload = lifecycle("Create");
        payload["RequestType"] = json!(3);
        payload["StackId"] = json!(null);

        let response = h.orchestrator.handle(&payload, &invocation_ctx()).await;

        assert_eq!(response.status_code, 200);
        let sent = h.callbacks.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.status, CallbackStatus::Failed);
        assert_eq!(sent[0].1.reason, "Unsupported request type: 3");
        assert_eq!(h.worker.calls(), 0);
    }

    #[test]
    fn test_response_wire_shape() {
        let response = InvocationResponse::new(200, &json!({ "ok": true }));
        let wire = serde_json::to_value(&response).unwrap();
        assert_eq!(wire["statusCode"], json!(200));
        assert_eq!(wire["body"], json!("{\"ok\":true}"));
    }

    #[test]
    fn test_error_status_codes() {
        let missing = OrchestratorError::from(RouterError::MissingParameter("region"));
        assert_eq!(missing.status_code(), 400);

        let unknown = OrchestratorError::from(RegistryError::UnknownService("foo".into()));
        assert_eq!(unknown.status_code(), 400);
        assert_eq!(unknown.error_type(), "UnknownService");

        let callback = OrchestratorError::from(LifecycleError::CallbackStatus(500));
        assert_eq!(callback.status_code(), 500);

        let discovery = OrchestratorError::from(DiscoveryError::Status(503));
        assert_eq!(discovery.status_code(), 500);
        assert_eq!(discovery.error_type(), "DiscoveryError");
    }
}
