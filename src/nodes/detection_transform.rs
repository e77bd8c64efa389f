use async_trait::async_trait;

use crate::core::runtime_context::RuntimeContext;
use crate::core::variable_pool::VariablePool;
use crate::domain::model::round_coordinate;
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::StepError;
use crate::evaluator::FilterExpression;
use crate::nodes::executor::StepExecutor;
use crate::nodes::utils::{map_predictions, resolve_predictions, resolve_required};

// ================================
// DetectionFilter
// ================================

/// Keeps the detections matching `filter_definition`.
pub struct DetectionFilterExecutor;

#[async_trait]
impl StepExecutor for DetectionFilterExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        _context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let definition = step.raw("filter_definition").ok_or_else(|| {
            StepError::ConfigError(format!(
                "step '{}' requires a filter_definition",
                step.name
            ))
        })?;
        let filter = FilterExpression::compile(definition)?;
        let (predictions, image_meta) = resolve_predictions(step, "predictions", pool)?;

        let outputs = map_predictions(predictions, &image_meta, |detections| {
            let mut kept = Vec::with_capacity(detections.len());
            for detection in detections {
                if filter.matches(&detection)? {
                    kept.push(detection);
                }
            }
            Ok(kept)
        })?;
        Ok(StepRunResult::with_outputs(outputs))
    }
}

// ================================
// DetectionOffset
// ================================

/// Grows (or shrinks) every box by `offset_x`/`offset_y` pixels around its
/// center. Each result is a new detection parented to the one it came from.
pub struct DetectionOffsetExecutor;

#[async_trait]
impl StepExecutor for DetectionOffsetExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let offset_x = round_coordinate(resolve_required(step, "offset_x", pool)?.expect_f64("offset_x")?);
        let offset_y = round_coordinate(resolve_required(step, "offset_y", pool)?.expect_f64("offset_y")?);
        let (predictions, image_meta) = resolve_predictions(step, "predictions", pool)?;

        let outputs = map_predictions(predictions, &image_meta, |detections| {
            Ok(detections
                .into_iter()
                .map(|mut detection| {
                    detection.width += offset_x;
                    detection.height += offset_y;
                    detection.parent_id = std::mem::replace(
                        &mut detection.id,
                        context.id_generator.next_id(),
                    );
                    detection
                })
                .collect())
        })?;
        Ok(StepRunResult::with_outputs(outputs))
    }
}
