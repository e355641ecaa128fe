//! Prometheus metrics collection and formatting.
//!
//! Counters live for the lifetime of the process and are rendered in the
//! Prometheus text exposition format.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use provisioner_core::{EventKind, RunReport};

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct Metrics {
    invocations: [AtomicU64; 4],
    tasks_processed: AtomicU64,
    tasks_successful: AtomicU64,
    tasks_failed: AtomicU64,
    /// Last run's processing time in milliseconds.
    last_processing_ms: AtomicU64,
    /// Last run's success rate, as `f64` bits.
    last_success_rate: AtomicU64,
    errors: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self, kind: EventKind) {
        self.invocations[slot(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_report(&self, report: &RunReport) {
        self.tasks_processed
            .fetch_add(report.total_tasks as u64, Ordering::Relaxed);
        self.tasks_successful
            .fetch_add(report.successful as u64, Ordering::Relaxed);
        self.tasks_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.last_processing_ms
            .store(report.elapsed.as_millis() as u64, Ordering::Relaxed);
        self.last_success_rate
            .store(report.success_rate.to_bits(), Ordering::Relaxed);
    }

    pub fn record_error(&self, error_type: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            *errors.entry(error_type.to_string()).or_insert(0) += 1;
        }
    }

    pub fn invocations(&self, kind: EventKind) -> u64 {
        self.invocations[slot(kind)].load(Ordering::Relaxed)
    }

    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self, error_type: &str) -> u64 {
        self.errors
            .lock()
            .map(|errors| errors.get(error_type).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Format all metrics as Prometheus text.
    pub fn render(&self) -> String {
        let mut output = String::new();

        self.render_invocations(&mut output);
        self.render_tasks(&mut output);
        self.render_last_run(&mut output);
        self.render_errors(&mut output);

        output
    }

    fn render_invocations(&self, output: &mut String) {
        writeln!(
            output,
            "# HELP provisioner_invocations_total Invocations handled by event type"
        )
        .ok();
        writeln!(output, "# TYPE provisioner_invocations_total counter").ok();
        for kind in EventKind::all() {
            writeln!(
                output,
                "provisioner_invocations_total{{event_type=\"{}\"}} {}",
                kind.as_str(),
                self.invocations(kind)
            )
            .ok();
        }
    }

    fn render_tasks(&self, output: &mut String) {
        writeln!(output).ok();
        writeln!(
            output,
            "# HELP provisioner_tasks_total Tasks dispatched by outcome"
        )
        .ok();
        writeln!(output, "# TYPE provisioner_tasks_total counter").ok();
        writeln!(
            output,
            "provisioner_tasks_total{{outcome=\"processed\"}} {}",
            self.tasks_processed()
        )
        .ok();
        writeln!(
            output,
            "provisioner_tasks_total{{outcome=\"successful\"}} {}",
            self.tasks_successful.load(Ordering::Relaxed)
        )
        .ok();
        writeln!(
            output,
            "provisioner_tasks_total{{outcome=\"failed\"}} {}",
            self.tasks_failed.load(Ordering::Relaxed)
        )
        .ok();
    }

    fn render_last_run(&self, output: &mut String) {
        let seconds = self.last_processing_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        let rate = f64::from_bits(self.last_success_rate.load(Ordering::Relaxed));

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP provisioner_last_processing_seconds Duration of the last run"
        )
        .ok();
        writeln!(output, "# TYPE provisioner_last_processing_seconds gauge").ok();
        writeln!(output, "provisioner_last_processing_seconds {seconds}").ok();

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP provisioner_last_success_rate Success rate of the last run"
        )
        .ok();
        writeln!(output, "# TYPE provisioner_last_success_rate gauge").ok();
        writeln!(output, "provisioner_last_success_rate {rate}").ok();
    }

    fn render_errors(&self, output: &mut String) {
        writeln!(output).ok();
        writeln!(
            output,
            "# HELP provisioner_errors_total Invocation errors by type"
        )
        .ok();
        writeln!(output, "# TYPE provisioner_errors_total counter").ok();
        if let Ok(errors) = self.errors.lock() {
            for (error_type, count) in errors.iter() {
                writeln!(
                    output,
                    "provisioner_errors_total{{error_type=\"{error_type}\"}} {count}"
                )
                .ok();
            }
        }
    }
}

fn slot(kind: EventKind) -> usize {
    match kind {
        EventKind::Lifecycle => 0,
        EventKind::Scheduled => 1,
        EventKind::Direct => 2,
        EventKind::SingleTask => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_core::{RunId, Task, TaskError, TaskErrorKind, TaskResult};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[test]
    fn test_render_empty() {
        let output = Metrics::new().render();

        assert!(output.contains("provisioner_invocations_total{event_type=\"CloudFormation\"} 0"));
        assert!(output.contains("provisioner_tasks_total{outcome=\"processed\"} 0"));
        assert!(output.contains("# TYPE provisioner_errors_total counter"));
        assert!(output.contains("provisioner_last_success_rate 0"));
    }

    #[test]
    fn test_record_report_and_errors() {
        let metrics = Metrics::new();
        let report = RunReport::from_results(
            RunId::new("r"),
            BTreeSet::new(),
            BTreeSet::new(),
            4,
            Duration::from_millis(1500),
            vec![
                TaskResult::succeeded(&Task::new("os", "a"), json!({})),
                TaskResult::failed(
                    &Task::new("os", "b"),
                    TaskError::new(TaskErrorKind::Timeout, "slow"),
                ),
            ],
        );

        metrics.record_invocation(EventKind::Scheduled);
        metrics.record_invocation(EventKind::Scheduled);
        metrics.record_report(&report);
        metrics.record_error("MissingParameter");

        assert_eq!(metrics.invocations(EventKind::Scheduled), 2);
        assert_eq!(metrics.tasks_processed(), 2);
        assert_eq!(metrics.errors("MissingParameter"), 1);

        let output = metrics.render();
        assert!(output.contains("provisioner_invocations_total{event_type=\"Scheduled\"} 2"));
        assert!(output.contains("provisioner_tasks_total{outcome=\"failed\"} 1"));
        assert!(output.contains("provisioner_last_processing_seconds 1.5"));
        assert!(output.contains("provisioner_last_success_rate 0.5"));
        assert!(output.contains("provisioner_errors_total{error_type=\"MissingParameter\"} 1"));
    }
}
