//! Status enums for lifecycle callbacks and invocation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal status reported back to the lifecycle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallbackStatus {
    /// The resource operation succeeded.
    Success,
    /// The resource operation failed.
    Failed,
}

impl CallbackStatus {
    /// Wire representation (`SUCCESS` / `FAILED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CallbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an invocation reached the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Infrastructure-as-code Create/Update/Delete notification.
    Lifecycle,
    /// Timer-originated run.
    Scheduled,
    /// Direct full-scope invocation.
    Direct,
    /// Direct invocation narrowed to a single (service, region) task.
    SingleTask,
}

impl EventKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lifecycle => "CloudFormation",
            Self::Scheduled => "Scheduled",
            Self::Direct => "Direct",
            Self::SingleTask => "SingleTask",
        }
    }

    /// All kinds, in metrics rendering order.
    pub fn all() -> [EventKind; 4] {
        [Self::Lifecycle, Self::Scheduled, Self::Direct, Self::SingleTask]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&CallbackStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&CallbackStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }
}
