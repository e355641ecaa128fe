//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the provisioner.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A service parameter has no value in the run context.
    #[error("Parameter '{param}' cannot be resolved for service '{service}'")]
    UnresolvedParameter { service: String, param: String },

    /// Unknown feature-flag policy name.
    #[error("Unknown flag policy: {0} (expected 'strict' or 'permissive')")]
    UnknownFlagPolicy(String),
}
