//! The model provider collaborator.
//!
//! Concrete model runtimes live outside this crate. Steps that need a model
//! call through [`ModelProvider`], which the caller hands to the runner.

use async_trait::async_trait;

pub mod error;
pub mod types;

pub use error::ModelProviderError;
pub use types::{InferenceRequest, InferenceResponse, InferenceTask, ModelHandle};

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Loads `model_id`. Idempotent; the first call may be slow.
    async fn load_model(
        &self,
        model_id: &str,
        api_key: Option<&str>,
    ) -> Result<ModelHandle, ModelProviderError>;

    async fn infer(
        &self,
        model: &ModelHandle,
        request: InferenceRequest,
    ) -> Result<InferenceResponse, ModelProviderError>;
}

/// Provider used when none is configured. Every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableModelProvider;

#[async_trait]
impl ModelProvider for UnavailableModelProvider {
    async fn load_model(
        &self,
        model_id: &str,
        _api_key: Option<&str>,
    ) -> Result<ModelHandle, ModelProviderError> {
        Err(ModelProviderError::Unavailable(format!(
            "no model provider configured to load '{}'",
            model_id
        )))
    }

    async fn infer(
        &self,
        model: &ModelHandle,
        _request: InferenceRequest,
    ) -> Result<InferenceResponse, ModelProviderError> {
        Err(ModelProviderError::Unavailable(format!(
            "no model provider configured to run '{}'",
            model.model_id
        )))
    }
}
