//! Provisioner Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Cloud provider SDKs
//! - Runtime specifics
//!
//! Everything here describes one fan-out run: which (service, region) tasks
//! exist, what each produced, and how the run is summarised.

pub mod error;
pub mod ids;
pub mod params;
pub mod report;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{RegionId, RunId, ServiceId};
pub use params::{FeatureFlags, FlagPolicy, ParamKind, RunContext};
pub use report::RunReport;
pub use status::{CallbackStatus, EventKind};
pub use task::{Task, TaskError, TaskErrorKind, TaskResult};
