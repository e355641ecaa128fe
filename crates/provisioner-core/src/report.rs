//! Aggregate report for one dispatch cycle.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::{RegionId, RunId, ServiceId, TaskResult};

/// Aggregate outcome of one fan-out run.
///
/// `successful + failed == total_tasks == results.len()` always holds; every
/// dispatched task contributes exactly one result.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub regions: BTreeSet<RegionId>,
    pub services: BTreeSet<ServiceId>,
    pub total_tasks: usize,
    pub successful: usize,
    pub failed: usize,

    /// Fraction in `[0, 1]`; `0.0` for an empty run.
    pub success_rate: f64,

    #[serde(rename = "processing_time_seconds", serialize_with = "serialize_seconds")]
    pub elapsed: Duration,

    /// Concurrency bound the run was dispatched with.
    pub max_concurrency: usize,

    /// One entry per task, sorted by service then region.
    pub results: Vec<TaskResult>,
}

impl RunReport {
    /// Build a report from the collected results.
    pub fn from_results(
        run_id: RunId,
        regions: BTreeSet<RegionId>,
        services: BTreeSet<ServiceId>,
        max_concurrency: usize,
        elapsed: Duration,
        mut results: Vec<TaskResult>,
    ) -> Self {
        results.sort_by(|a, b| (&a.service, &a.region).cmp(&(&b.service, &b.region)));

        let total_tasks = results.len();
        let successful = results.iter().filter(|r| r.success).count();
        let failed = total_tasks - successful;

        Self {
            run_id,
            regions,
            services,
            total_tasks,
            successful,
            failed,
            success_rate: success_rate(successful, total_tasks),
            elapsed,
            max_concurrency,
            results,
        }
    }

    /// Whether the run clears `threshold` (inclusive).
    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.success_rate >= threshold
    }

    /// Iterate the failed results.
    pub fn failures(&self) -> impl Iterator<Item = &TaskResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Success rate as a percentage with two decimals, for messages.
    pub fn success_percent(&self) -> String {
        format!("{:.2}", self.success_rate * 100.0)
    }
}

/// `successful / total`, defined as `0.0` when there is nothing to divide.
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64
    }
}

fn serialize_seconds<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let seconds = (elapsed.as_secs_f64() * 100.0).round() / 100.0;
    serializer.serialize_f64(seconds)
}
