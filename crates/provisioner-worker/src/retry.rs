//! Opt-in retry decorator for workers.
//!
//! The baseline is a single attempt per task. Wrapping a worker in
//! [`RetryingWorker`] retries only errors the worker reports as retryable.
//! With an `attempt_timeout`, each attempt is bounded on its own, so a hanging
//! first attempt still leaves room for the next one. Callers that bound the
//! whole call should allow [`RetryPolicy::total_budget`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::{WorkInvocation, Worker, WorkerError};

const BACKOFF_FACTOR: u32 = 2;

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    pub initial_backoff: Duration,

    /// Upper bound on any single delay.
    pub max_backoff: Duration,

    /// Upper bound on each attempt. Elapsed attempts fail as retryable timeouts.
    pub attempt_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Longest a call can take: every attempt running to `attempt_timeout`
    /// plus every backoff between them.
    pub fn total_budget(&self, attempt_timeout: Duration) -> Duration {
        let attempts = self.max_attempts.max(1);
        let mut total = attempt_timeout.saturating_mul(attempts);
        let mut backoff = self.initial_backoff.min(self.max_backoff);
        for _ in 1..attempts {
            total = total.saturating_add(backoff);
            backoff = self.next_backoff(backoff);
        }
        total
    }

    /// Calculate the next backoff duration.
    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(BACKOFF_FACTOR).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: None,
        }
    }
}

/// Retries retryable failures of the wrapped worker with exponential backoff.
pub struct RetryingWorker<W> {
    inner: W,
    policy: RetryPolicy,
}

impl<W: Worker> RetryingWorker<W> {
    pub fn new(inner: W, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn attempt(&self, invocation: &WorkInvocation) -> Result<Value, WorkerError> {
        let Some(limit) = self.policy.attempt_timeout else {
            return self.inner.invoke(invocation).await;
        };
        tokio::time::timeout(limit, self.inner.invoke(invocation))
            .await
            .unwrap_or_else(|_| {
                Err(WorkerError::Timeout(format!(
                    "no answer within {}s",
                    limit.as_secs_f64()
                )))
            })
    }
}

#[async_trait]
impl<W: Worker> Worker for RetryingWorker<W> {
    async fn invoke(&self, invocation: &WorkInvocation) -> Result<Value, WorkerError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff.min(self.policy.max_backoff);
        let mut attempt = 1;

        loop {
            match self.attempt(invocation).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        service = %invocation.task.service,
                        region = %invocation.task.region,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Worker call failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.policy.next_backoff(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
