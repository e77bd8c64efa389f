//! Workflow-level error types.

use super::StepError;
use thiserror::Error;

/// Workflow-level errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("DSL parse error: {0}")]
    DslParseError(String),
    #[error("Graph build error: {0}")]
    GraphBuildError(String),
    #[error("Graph validation error: {0}")]
    GraphValidationError(String),
    #[error("Step not found: {0}")]
    StepNotFound(String),
    #[error("Step executor not found for type: {0}")]
    ExecutorNotFound(String),
    #[error("Cycle detected in graph")]
    CycleDetected,
    #[error("Output of step '{0}' was already written")]
    OutputAlreadyWritten(String),
    #[error("Step execution error: step={step}, error={source}")]
    StepExecutionError {
        step: String,
        #[source]
        source: StepError,
    },
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl WorkflowError {
    /// The step error behind a failed run, if any.
    pub fn step_error(&self) -> Option<&StepError> {
        match self {
            WorkflowError::StepExecutionError { source, .. } => Some(source),
            _ => None,
        }
    }
}
