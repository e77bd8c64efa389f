//! Error types for the workflow engine.
//!
//! - [`StepError`]: errors raised while a single step executes (selector
//!   resolution, structural violations, model provider failures).
//! - [`WorkflowError`]: top-level errors for parsing, graph building, and
//!   running a workflow.

pub mod step_error;
pub mod workflow_error;

pub use step_error::StepError;
pub use workflow_error::WorkflowError;

/// Convenience alias for workflow-level results.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
/// Convenience alias for step-level results.
pub type StepResult<T> = Result<T, StepError>;
