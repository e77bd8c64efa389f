use async_trait::async_trait;

use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::StepError;

/// Trait for step execution. Each step type implements this.
///
/// Executors read their inputs through the pool and never mutate values
/// they did not create; derived detections and images are fresh clones.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError>;

    /// Fields naming the steps this executor may route to. Non-empty only
    /// for flow-control steps.
    fn flow_control_fields(&self) -> &'static [&'static str] {
        &[]
    }
}
