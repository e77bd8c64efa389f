//! Public API layer: the entry point for running a workflow.

mod runner;

pub use runner::{WorkflowRunner, WorkflowRunnerBuilder};
