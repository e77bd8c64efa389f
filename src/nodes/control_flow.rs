use async_trait::async_trait;

use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::StepError;
use crate::evaluator::{compare, Operator};
use crate::nodes::executor::StepExecutor;
use crate::nodes::utils::resolve;

// ================================
// Condition
// ================================

pub const STEP_IF_TRUE: &str = "step_if_true";
pub const STEP_IF_FALSE: &str = "step_if_false";

/// Compares `left` and `right` and routes to `step_if_true` or
/// `step_if_false`. Produces no outputs.
pub struct ConditionExecutor;

#[async_trait]
impl StepExecutor for ConditionExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let operator: Operator = step
            .raw("operator")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                StepError::ConfigError(format!("step '{}' requires an operator", step.name))
            })?
            .parse()?;
        let left = resolve(step, "left", pool)?;
        let right = resolve(step, "right", pool)?;

        let outcome = compare(operator, &left, &right)?;
        let next_step = step.selector(if outcome { STEP_IF_TRUE } else { STEP_IF_FALSE })?;
        tracing::trace!(
            step = %step.name,
            %operator,
            outcome,
            next = %next_step,
            "condition evaluated"
        );
        Ok(StepRunResult::branch(next_step))
    }

    fn flow_control_fields(&self) -> &'static [&'static str] {
        &[STEP_IF_TRUE, STEP_IF_FALSE]
    }
}
