use thiserror::Error;

use crate::inference::ModelProviderError;

/// Step-level errors
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Unknown input: {0}")]
    UnknownInput(String),
    #[error("Unresolved reference: step '{0}' has not produced output yet")]
    UnresolvedReference(String),
    #[error("Unknown field '{field}' in output of step '{step}'")]
    UnknownField { step: String, field: String },
    #[error("Invalid selector: {0}")]
    InvalidSelector(String),
    #[error("Execution graph error: {0}")]
    ExecutionGraphError(String),
    #[error("Model provider error: {0}")]
    ModelProviderError(#[from] ModelProviderError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Image error: {0}")]
    ImageError(String),
}

impl StepError {
    /// Selector and structural errors point at a malformed workflow or
    /// caller input rather than a transient condition.
    pub fn is_structural(&self) -> bool {
        !matches!(self, StepError::ModelProviderError(_))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(e: serde_json::Error) -> Self {
        StepError::ConfigError(e.to_string())
    }
}

impl From<image::ImageError> for StepError {
    fn from(e: image::ImageError) -> Self {
        StepError::ImageError(e.to_string())
    }
}
