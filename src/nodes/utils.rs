use crate::core::outputs_lookup::OutputMap;
use crate::core::segment::{BatchShape, Segment};
use crate::core::variable_pool::VariablePool;
use crate::domain::model::{Detection, ParamRef, WorkflowImage};
use crate::dsl::schema::StepDefinition;
use crate::error::{StepError, StepResult};

/// Output field holding the image metadata that travels with predictions.
pub const IMAGE_FIELD: &str = "image";
pub const PARENT_ID_FIELD: &str = "parent_id";
pub const PREDICTIONS_FIELD: &str = "predictions";

pub fn resolve(step: &StepDefinition, field: &str, pool: &VariablePool) -> StepResult<Segment> {
    pool.resolve(&step.param(field)?)
}

/// Resolves a field that must be present and non-null.
pub fn resolve_required(
    step: &StepDefinition,
    field: &str,
    pool: &VariablePool,
) -> StepResult<Segment> {
    let value = resolve(step, field, pool)?;
    if value.is_none() {
        return Err(StepError::ConfigError(format!(
            "step '{}' is missing required field '{}'",
            step.name, field
        )));
    }
    Ok(value)
}

pub fn resolve_images(
    step: &StepDefinition,
    field: &str,
    pool: &VariablePool,
) -> StepResult<BatchShape<WorkflowImage>> {
    resolve_required(step, field, pool)?.to_images(&qualified(step, field))
}

/// Resolves predictions together with the metadata of the image they were
/// made against (`None` when the source carries none).
pub fn resolve_predictions(
    step: &StepDefinition,
    field: &str,
    pool: &VariablePool,
) -> StepResult<(BatchShape<Vec<Detection>>, Segment)> {
    let param = step.param(field)?;
    let predictions = pool.resolve(&param)?.to_predictions(&qualified(step, field))?;
    Ok((predictions, image_metadata(pool, &param)?))
}

pub fn image_metadata(pool: &VariablePool, param: &ParamRef) -> StepResult<Segment> {
    Ok(pool.resolve_sibling(param, IMAGE_FIELD)?.unwrap_or_default())
}

/// Picks the metadata of batch element `index`; unbatched metadata is shared
/// by every element.
pub fn metadata_at(meta: &Segment, index: usize, batch_size: usize) -> Segment {
    match meta {
        Segment::Batch(items) if items.len() == batch_size => {
            items.get(index).cloned().unwrap_or_default()
        }
        other => other.clone(),
    }
}

pub fn dimension_mismatch(step: &StepDefinition) -> StepError {
    StepError::ExecutionGraphError(format!(
        "Detected mismatch of input dimensions in step: {}",
        step.name
    ))
}

/// Pairs two per-image inputs, broadcasting a single value across a batch.
pub fn zip_broadcast<A: Clone, B: Clone>(
    step: &StepDefinition,
    left: BatchShape<A>,
    right: BatchShape<B>,
) -> StepResult<Vec<(A, B)>> {
    let (left, right) = (left.into_vec(), right.into_vec());
    match (left.len(), right.len()) {
        (l, r) if l == r => Ok(left.into_iter().zip(right).collect()),
        (1, _) => Ok(right.into_iter().map(|b| (left[0].clone(), b)).collect()),
        (_, 1) => Ok(left.into_iter().map(|a| (a, right[0].clone())).collect()),
        _ => Err(dimension_mismatch(step)),
    }
}

pub fn parent_ids(detections: &[Detection]) -> Segment {
    Segment::Array(
        detections
            .iter()
            .map(|d| Segment::String(d.parent_id.clone()))
            .collect(),
    )
}

/// Output record of a predictions-in, predictions-out step.
pub fn predictions_record(detections: Vec<Detection>, image: Segment) -> OutputMap {
    let mut record = OutputMap::new();
    record.insert(PARENT_ID_FIELD.to_string(), parent_ids(&detections));
    record.insert(PREDICTIONS_FIELD.to_string(), Segment::Detections(detections));
    record.insert(IMAGE_FIELD.to_string(), image);
    record
}

/// Applies `transform` to every per-image list, keeping the input shape and
/// pairing each element with its image metadata.
pub fn map_predictions(
    predictions: BatchShape<Vec<Detection>>,
    image_meta: &Segment,
    mut transform: impl FnMut(Vec<Detection>) -> StepResult<Vec<Detection>>,
) -> StepResult<BatchShape<OutputMap>> {
    let batch_size = predictions.len();
    match predictions {
        BatchShape::Single(detections) => Ok(BatchShape::Single(predictions_record(
            transform(detections)?,
            image_meta.clone(),
        ))),
        BatchShape::Batch(lists) => lists
            .into_iter()
            .enumerate()
            .map(|(i, detections)| {
                Ok(predictions_record(
                    transform(detections)?,
                    metadata_at(image_meta, i, batch_size),
                ))
            })
            .collect::<StepResult<Vec<_>>>()
            .map(BatchShape::Batch),
    }
}

fn qualified(step: &StepDefinition, field: &str) -> String {
    format!("{}.{}", step.name, field)
}
