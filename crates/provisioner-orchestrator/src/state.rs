//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;

/// Shared application state for the HTTP surface.
pub struct AppState {
    pub orchestrator: Orchestrator,

    /// Same counters the orchestrator records into.
    pub metrics: Arc<Metrics>,

    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new AppState wrapped in Arc.
    pub fn new(orchestrator: Orchestrator) -> Arc<Self> {
        Arc::new(Self {
            metrics: orchestrator.metrics(),
            orchestrator,
            started_at: Utc::now(),
        })
    }
}
