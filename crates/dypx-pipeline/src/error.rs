//! Error types for the pipeline engine.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Backend call failed after the transport's retry budget.
    #[error("Backend error: {0}")]
    Client(#[from] dypx_client::Error),

    /// A pipeline or plugin search matched nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resolved template cannot be launched.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// The backend could not be reached while polling.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// Failed to serialize a request payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to send a notification.
    #[error("Notification failed: {0}")]
    Notification(String),
}

impl PipelineError {
    /// True for "no such pipeline/plugin" conditions.
    pub fn is_not_found(&self) -> bool {
        match self {
            PipelineError::NotFound(_) => true,
            PipelineError::Client(err) => err.is_not_found(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(PipelineError::NotFound("pipeline 'x'".into()).is_not_found());
        assert!(PipelineError::Client(dypx_client::Error::NotFound("p".into())).is_not_found());
        assert!(!PipelineError::Unreachable("down".into()).is_not_found());
    }

    #[test]
    fn test_display_wraps_client_error() {
        let err = PipelineError::from(dypx_client::Error::Api {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(err.to_string().starts_with("Backend error:"));
    }
}
