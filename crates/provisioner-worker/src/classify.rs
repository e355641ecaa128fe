//! Classification of provider error messages.
//!
//! Several provisioning calls fail with an error when the resource is already
//! in place. Those failures mean "nothing to do", not "broken". This is the one
//! place that inspects message text to tell the two apart.

/// Outcome class of a provider error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The resource already exists or is already associated.
    AlreadyExists,
    /// A real failure.
    Fatal,
}

impl ErrorClass {
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::AlreadyExists)
    }
}

/// Markers of an "already in place" failure, matched case-insensitively.
const BENIGN_MARKERS: &[&str] = &[
    "resourceinuseexception",
    "resourcealreadyexists",
    "flowlogalreadyexists",
    "duplicaterequest",
    "already associated",
    "already exists",
    "already has required logging enabled",
];

/// Classify a provider error message.
pub fn classify_error_message(message: &str) -> ErrorClass {
    let lowered = message.to_ascii_lowercase();
    if BENIGN_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        ErrorClass::AlreadyExists
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_messages() {
        let benign = [
            "An error occurred (ResourceInUseException) when calling the AssociateResolverQueryLogConfig operation",
            "The resolver query log config is already associated with vpc-0abc",
            "An error occurred (ResourceAlreadyExistsException) when calling CreateAccessEntry",
            "FlowLogAlreadyExists: Error. There is an existing Flow Log with the same configuration",
            "DuplicateRequest: the request was already processed",
            "Access entry already exists for cluster prod",
            "Cluster prod already has required logging enabled",
        ];
        for message in benign {
            assert_eq!(
                classify_error_message(message),
                ErrorClass::AlreadyExists,
                "{message}"
            );
        }
    }

    #[test]
    fn test_fatal_messages() {
        let fatal = [
            "An error occurred (AccessDeniedException) when calling CreateFlowLogs",
            "An error occurred (ResourceNotFoundException): Cluster prod not found",
            "InvalidRequestException: incompatible authentication mode",
            "Rate exceeded",
            "",
        ];
        for message in fatal {
            assert_eq!(classify_error_message(message), ErrorClass::Fatal, "{message}");
            assert!(!classify_error_message(message).is_benign());
        }
    }
}
