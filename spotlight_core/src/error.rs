//! Error types for the rotation engine.

use spotlight_env::SourceError;
use thiserror::Error;

/// Errors produced while resolving or scheduling observations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RotationError {
    /// A candidate batch or detail request failed
    #[error("Failed to retrieve an observation: {0}")]
    FetchFailed(#[from] SourceError),

    /// Selection was invoked with nothing to choose from
    #[error("No candidates to select from")]
    EmptyCandidateSet,

    /// Both the live batch and the cached batch were empty
    #[error("No observations available to select from")]
    NoCandidatesAvailable,

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler task is no longer running
    #[error("Rotation scheduler has stopped")]
    SchedulerStopped,
}

impl RotationError {
    /// Returns true for errors that indicate a broken caller contract
    /// rather than an environmental failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, RotationError::EmptyCandidateSet)
    }
}

/// Convenience Result type using RotationError
pub type Result<T> = std::result::Result<T, RotationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_wraps_source_error() {
        let err: RotationError = SourceError::transport("502 Bad Gateway").into();
        assert_eq!(
            err.to_string(),
            "Failed to retrieve an observation: Transport error: 502 Bad Gateway"
        );
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn test_empty_candidate_set_is_contract_violation() {
        assert!(RotationError::EmptyCandidateSet.is_contract_violation());
        assert!(!RotationError::NoCandidatesAvailable.is_contract_violation());
    }
}
