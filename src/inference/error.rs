use thiserror::Error;

/// Failures reported by a model provider. The engine surfaces them as-is
/// and never retries.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelProviderError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Unauthorized access to model: {0}")]
    Unauthorized(String),

    #[error("Failed to load model {model_id}: {message}")]
    LoadFailed { model_id: String, message: String },

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Model provider unavailable: {0}")]
    Unavailable(String),
}
