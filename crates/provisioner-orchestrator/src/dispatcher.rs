//! Task dispatcher - bounded fan-out of tasks to workers.
//!
//! Every task in a scope produces exactly one [`TaskResult`]. A failing,
//! hanging or panicking worker only affects its own task.

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use provisioner_core::{RunContext, RunId, RunReport, Task, TaskError, TaskErrorKind, TaskResult};
use provisioner_worker::{WorkInvocation, Worker};

use crate::registry::{RegistryError, ServiceRegistry};
use crate::scope::Scope;

/// Dispatcher tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum worker calls in flight.
    pub max_concurrency: usize,

    /// Pause taken while holding a permit, before each worker call.
    pub invocation_delay: Duration,

    /// Upper bound on a single worker call.
    pub task_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            invocation_delay: Duration::from_millis(100),
            task_timeout: Duration::from_secs(60),
        }
    }
}

/// Fans a scope's tasks out to their workers.
pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    ctx: Arc<RunContext>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, ctx: Arc<RunContext>, config: DispatchConfig) -> Self {
        Self {
            registry,
            ctx,
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Dispatch every task of `scope` and aggregate the results.
    pub async fn dispatch_run(&self, run_id: RunId, scope: &Scope) -> RunReport {
        let started = Instant::now();
        let results = self.dispatch(&run_id, scope).await;
        let report = RunReport::from_results(
            run_id,
            scope.regions.clone(),
            scope.services.clone(),
            self.config.max_concurrency,
            started.elapsed(),
            results,
        );

        info!(
            run_id = %report.run_id,
            total = report.total_tasks,
            successful = report.successful,
            failed = report.failed,
            success_rate = report.success_rate,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run completed"
        );
        report
    }

    /// Dispatch every task of `scope`; one result per task, in completion order.
    pub async fn dispatch(&self, run_id: &RunId, scope: &Scope) -> Vec<TaskResult> {
        let tasks = scope.tasks();
        if tasks.is_empty() {
            info!(run_id = %run_id, "Nothing to dispatch");
            return Vec::new();
        }

        info!(
            run_id = %run_id,
            tasks = tasks.len(),
            max_concurrency = self.config.max_concurrency,
            "Dispatching tasks"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut running = JoinSet::new();
        let mut results = Vec::with_capacity(tasks.len());

        for task in &tasks {
            let (worker, invocation) = match self.prepare(run_id, task) {
                Ok(prepared) => prepared,
                Err(error) => {
                    warn!(
                        service = %task.service,
                        region = %task.region,
                        error = %error,
                        "Task not dispatched"
                    );
                    results.push(TaskResult::failed(task, error));
                    continue;
                }
            };

            let semaphore = semaphore.clone();
            let delay = self.config.invocation_delay;
            let timeout = self.config.task_timeout;

            running.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TaskResult::failed(
                        &invocation.task,
                        TaskError::new(TaskErrorKind::Aborted, "dispatch was shut down"),
                    );
                };
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                run_task(worker, invocation, timeout).await
            });
        }

        // Single writer: only this loop appends to `results`.
        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(run_id = %run_id, error = %e, "Task handle failed to join"),
            }
        }

        backfill_missing(&tasks, &mut results);
        results
    }

    /// Look up the task's service and bind its parameters.
    fn prepare(
        &self,
        run_id: &RunId,
        task: &Task,
    ) -> Result<(Arc<dyn Worker>, WorkInvocation), TaskError> {
        let descriptor = self
            .registry
            .lookup(&task.service)
            .map_err(|e| TaskError::new(TaskErrorKind::UnknownService, e.to_string()))?;

        let params = ServiceRegistry::bind(descriptor, &task.region, &self.ctx).map_err(|e| {
            let kind = match e {
                RegistryError::UnknownService(_) => TaskErrorKind::UnknownService,
                _ => TaskErrorKind::MissingParameter,
            };
            TaskError::new(kind, e.to_string())
        })?;

        let invocation = WorkInvocation::new(run_id.clone(), task.clone(), &self.ctx.client_name)
            .with_params(params);
        Ok((descriptor.handler.clone(), invocation))
    }
}

/// Run one worker call, converting every failure mode into a failed result.
async fn run_task(worker: Arc<dyn Worker>, invocation: WorkInvocation, timeout: Duration) -> TaskResult {
    let task = &invocation.task;
    debug!(service = %task.service, region = %task.region, worker = worker.name(), "Invoking worker");

    let call = AssertUnwindSafe(worker.invoke(&invocation)).catch_unwind();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(payload))) => TaskResult::succeeded(task, payload),
        Ok(Ok(Err(e))) => TaskResult::failed(task, TaskError::new(e.kind(), e.to_string())),
        Ok(Err(panic)) => TaskResult::failed(
            task,
            TaskError::new(
                TaskErrorKind::Panicked,
                format!("worker panicked: {}", panic_message(panic.as_ref())),
            ),
        ),
        Err(_) => TaskResult::failed(
            task,
            TaskError::new(
                TaskErrorKind::Timeout,
                format!("worker did not finish within {}s", timeout.as_secs_f64()),
            ),
        ),
    };

    match &result.error {
        None => info!(service = %task.service, region = %task.region, "Task succeeded"),
        Some(error) => warn!(
            service = %task.service,
            region = %task.region,
            kind = ?error.kind,
            error = %error.message,
            "Task failed"
        ),
    }
    result
}

/// Add an `Aborted` result for every task that never reported.
fn backfill_missing(tasks: &[Task], results: &mut Vec<TaskResult>) {
    let reported: BTreeSet<Task> = results.iter().map(TaskResult::task).collect();
    for task in tasks.iter().filter(|t| !reported.contains(*t)) {
        warn!(service = %task.service, region = %task.region, "Task never reported, marking aborted");
        results.push(TaskResult::failed(
            task,
            TaskError::new(TaskErrorKind::Aborted, "task did not report a result"),
        ));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, ScriptedWorker};
    use provisioner_core::{ParamKind, RegionId, ServiceId};

    fn dispatcher(worker: Arc<ScriptedWorker>, config: DispatchConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(ServiceRegistry::standard(worker)),
            Arc::new(context()),
            config,
        )
    }

    fn fast() -> DispatchConfig {
        DispatchConfig {
            invocation_delay: Duration::ZERO,
            ..DispatchConfig::default()
        }
    }

    fn scope(services: &[&str], regions: &[&str]) -> Scope {
        Scope::new(
            regions.iter().map(|r| RegionId::new(*r)),
            services.iter().map(|s| ServiceId::new(*s)),
        )
    }

    #[tokio::test]
    async fn test_every_task_reports_exactly_once() {
        let worker = Arc::new(ScriptedWorker::ok());
        let dispatcher = dispatcher(worker.clone(), fast());
        let scope = scope(&["os", "dns", "vfl"], &["us-east-1", "eu-west-1"]);

        let report = dispatcher.dispatch_run(RunId::new("r"), &scope).await;

        assert_eq!(report.total_tasks, 6);
        assert_eq!(report.successful, 6);
        let reported: BTreeSet<Task> = report.results.iter().map(TaskResult::task).collect();
        assert_eq!(reported, scope.tasks().into_iter().collect::<BTreeSet<Task>>());
        assert_eq!(worker.calls(), 6);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_siblings() {
        let worker = Arc::new(ScriptedWorker::ok().failing_on(Task::new("dns", "eu-west-1")));
        let dispatcher = dispatcher(worker, fast());
        let scope = scope(&["os", "dns"], &["us-east-1", "eu-west-1", "ap-south-1"]);

        let report = dispatcher.dispatch_run(RunId::new("r"), &scope).await;

        assert_eq!(report.total_tasks, 6);
        assert_eq!(report.successful, 5);
        assert_eq!(report.failed, 1);
        assert!((report.success_rate - 5.0 / 6.0).abs() < 1e-9);

        let failed: Vec<Task> = report.failures().map(TaskResult::task).collect();
        assert_eq!(failed, [Task::new("dns", "eu-west-1")]);
        assert_eq!(report.results[0].error_kind(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let worker = Arc::new(ScriptedWorker::ok());
        let config = DispatchConfig {
            max_concurrency: 2,
            invocation_delay: Duration::from_millis(100),
            task_timeout: Duration::from_secs(60),
        };
        let dispatcher = dispatcher(worker.clone(), config);
        let regions: Vec<String> = (0..10).map(|i| format!("region-{i}")).collect();
        let regions: Vec<&str> = regions.iter().map(String::as_str).collect();

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["os"], &regions))
            .await;

        assert_eq!(report.total_tasks, 10);
        assert!(worker.max_in_flight() <= 2);
        assert!(report.elapsed >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unknown_service_never_reaches_worker() {
        let worker = Arc::new(ScriptedWorker::ok());
        let dispatcher = dispatcher(worker.clone(), fast());

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["foo"], &["us-east-1"]))
            .await;

        assert_eq!(report.total_tasks, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.results[0].error_kind(), Some(TaskErrorKind::UnknownService));
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_scope() {
        let worker = Arc::new(ScriptedWorker::ok());
        let dispatcher = dispatcher(worker.clone(), fast());

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["os"], &[]))
            .await;

        assert_eq!(report.total_tasks, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(worker.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_worker_times_out() {
        let worker = Arc::new(
            ScriptedWorker::ok().sleeping_on(Task::new("os", "eu-west-1"), Duration::from_secs(600)),
        );
        let config = DispatchConfig {
            task_timeout: Duration::from_secs(5),
            ..fast()
        };
        let dispatcher = dispatcher(worker, config);

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["os"], &["us-east-1", "eu-west-1"]))
            .await;

        assert_eq!(report.successful, 1);
        assert_eq!(report.results[0].error_kind(), Some(TaskErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_first_attempt_is_retried_within_bound() {
        use async_trait::async_trait;
        use provisioner_worker::{RetryPolicy, RetryingWorker, WorkerError};
        use serde_json::{json, Value};
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct HangsOnce {
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Worker for HangsOnce {
            async fn invoke(&self, _invocation: &WorkInvocation) -> Result<Value, WorkerError> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    std::future::pending::<()>().await;
                }
                Ok(json!({ "statusCode": 200 }))
            }
        }

        let attempt = Duration::from_millis(500);
        let policy = RetryPolicy {
            attempt_timeout: Some(attempt),
            ..RetryPolicy::default()
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = HangsOnce { calls: calls.clone() };
        let worker = Arc::new(RetryingWorker::new(inner, policy));
        let dispatcher = Dispatcher::new(
            Arc::new(ServiceRegistry::standard(worker)),
            Arc::new(context()),
            DispatchConfig {
                task_timeout: policy.total_budget(attempt),
                ..fast()
            },
        );

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["os"], &["us-east-1"]))
            .await;

        assert_eq!(report.successful, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_worker_is_contained() {
        let worker = Arc::new(ScriptedWorker::ok().panicking_on(Task::new("os", "us-east-1")));
        let dispatcher = dispatcher(worker, fast());

        let report = dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["dns", "os"], &["us-east-1"]))
            .await;

        assert_eq!(report.total_tasks, 2);
        assert_eq!(report.successful, 1);
        let failed = &report.results[1];
        assert_eq!(failed.error_kind(), Some(TaskErrorKind::Panicked));
        assert!(failed.error.as_ref().unwrap().message.contains("scripted panic"));
    }

    #[tokio::test]
    async fn test_worker_receives_bound_parameters() {
        let worker = Arc::new(ScriptedWorker::ok());
        let dispatcher = dispatcher(worker.clone(), fast());

        dispatcher
            .dispatch_run(RunId::new("r"), &scope(&["dns"], &["us-east-1"]))
            .await;

        let seen = worker.invocations();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].client_name, "acme");
        assert_eq!(seen[0].param(ParamKind::Bucket), Some("acme-logs"));
        assert_eq!(seen[0].param(ParamKind::EnableParam), Some("true"));
    }

    #[test]
    fn test_backfill_marks_missing_tasks_aborted() {
        let tasks = [Task::new("os", "a"), Task::new("os", "b")];
        let mut results = vec![TaskResult::succeeded(&tasks[0], serde_json::json!({}))];

        backfill_missing(&tasks, &mut results);

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].task(), tasks[1]);
        assert_eq!(results[1].error_kind(), Some(TaskErrorKind::Aborted));
    }
}
