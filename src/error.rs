//! Error types for the financial coach orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context construction error: {0}")]
    ContextError(String),

    #[error("Provider error: {message}")]
    Provider { retriable: bool, message: String },

    #[error("Output failed validation: {}", .0.join("; "))]
    OutputValidation(Vec<String>),

    #[error("Planner contract violation: {0}")]
    PlannerContract(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Generation timed out after {0}s")]
    Timeout(u64),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    /// Errors that the generation retry loop may back off and try again on.
    ///
    /// Provider errors carry their own flag (rate limits, transport failures);
    /// timeouts are transient; validation failures inside a retried attempt
    /// are re-prompted rather than surfaced.
    pub fn is_retriable(&self) -> bool {
        match self {
            OrchestrationError::Provider { retriable, .. } => *retriable,
            OrchestrationError::Timeout(_) => true,
            OrchestrationError::OutputValidation(_) => true,
            OrchestrationError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    pub fn retriable_provider(message: impl Into<String>) -> Self {
        OrchestrationError::Provider {
            retriable: true,
            message: message.into(),
        }
    }

    pub fn fatal_provider(message: impl Into<String>) -> Self {
        OrchestrationError::Provider {
            retriable: false,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(OrchestrationError::retriable_provider("429").is_retriable());
        assert!(!OrchestrationError::fatal_provider("401").is_retriable());
        assert!(OrchestrationError::Timeout(30).is_retriable());
        assert!(OrchestrationError::OutputValidation(vec!["x".into()]).is_retriable());
        assert!(!OrchestrationError::Cancelled.is_retriable());
        assert!(!OrchestrationError::PlannerContract("bad".into()).is_retriable());
    }

    #[test]
    fn test_validation_message_joins_issues() {
        let err = OrchestrationError::OutputValidation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Output failed validation: a; b");
    }
}
