//! Error types for the Spotlight environment abstraction.

use thiserror::Error;

/// Errors raised by an [`ObservationSource`](crate::ObservationSource).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network/HTTP failure (connection refused, 5xx, malformed body)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested observation does not exist
    #[error("Observation not found: {0}")]
    NotFound(String),

    /// Request did not complete in time
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl SourceError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a not-found error for the given id.
    pub fn not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_error_messages() {
        assert_eq!(
            SourceError::transport("connection reset").to_string(),
            "Transport error: connection reset"
        );
        assert_eq!(
            SourceError::not_found("obs-1").to_string(),
            "Observation not found: obs-1"
        );
        assert_eq!(SourceError::Timeout(250).to_string(), "Timeout after 250ms");
    }
}
