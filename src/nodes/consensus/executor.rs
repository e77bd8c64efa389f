use async_trait::async_trait;
use serde_json::Value;

use crate::core::outputs_lookup::OutputMap;
use crate::core::runtime_context::RuntimeContext;
use crate::core::segment::{BatchShape, Segment};
use crate::core::variable_pool::VariablePool;
use crate::domain::model::{Detection, ParamRef};
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::{StepError, StepResult};
use crate::nodes::executor::StepExecutor;
use crate::nodes::utils::{
    dimension_mismatch, image_metadata, metadata_at, resolve, resolve_required, IMAGE_FIELD,
    PARENT_ID_FIELD, PREDICTIONS_FIELD,
};

use super::merge::AggregationMode;
use super::voting::{as_count, resolve_batch_consensus, ConsensusOutcome, ConsensusParams, RequiredObjects};

pub const OBJECT_PRESENT_FIELD: &str = "object_present";
pub const PRESENCE_CONFIDENCE_FIELD: &str = "presence_confidence";

/// Votes detections from several sources into one consensus set per image.
pub struct DetectionsConsensusExecutor;

#[async_trait]
impl StepExecutor for DetectionsConsensusExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let params = source_params(step)?;
        let first = params.first().ok_or_else(|| {
            StepError::ExecutionGraphError(
                "Consensus step requires at least one source of predictions.".to_string(),
            )
        })?;
        let image_meta = image_metadata(pool, first)?;

        let mut sources = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let what = format!("{}.predictions[{}]", step.name, i);
            sources.push(pool.resolve(param)?.to_predictions(&what)?);
        }
        let batch_size = sources[0].len();
        if sources.iter().any(|s| s.len() != batch_size) {
            return Err(dimension_mismatch(step));
        }
        let all_single = sources.iter().all(|s| !s.is_batch());

        let consensus = consensus_params(step, pool)?;
        let per_source: Vec<Vec<Vec<Detection>>> =
            sources.into_iter().map(BatchShape::into_vec).collect();
        let mut records = Vec::with_capacity(batch_size);
        for index in 0..batch_size {
            let batch: Vec<Vec<Detection>> =
                per_source.iter().map(|s| s[index].clone()).collect();
            let outcome =
                resolve_batch_consensus(&batch, &consensus, context.id_generator.as_ref())?;
            records.push(consensus_record(
                outcome,
                metadata_at(&image_meta, index, batch_size),
            ));
        }
        tracing::debug!(
            step = %step.name,
            sources = per_source.len(),
            batch_size,
            "consensus step finished"
        );

        let outputs = match (all_single, records.pop()) {
            (true, Some(record)) if records.is_empty() => BatchShape::Single(record),
            (_, last) => {
                records.extend(last);
                BatchShape::Batch(records)
            }
        };
        Ok(StepRunResult::with_outputs(outputs))
    }
}

fn source_params(step: &StepDefinition) -> StepResult<Vec<ParamRef>> {
    match step.raw(PREDICTIONS_FIELD) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| ParamRef::from_value(item.clone()).map_err(StepError::InvalidSelector))
            .collect(),
        Some(_) => Ok(vec![step.param(PREDICTIONS_FIELD)?]),
    }
}

fn consensus_params(step: &StepDefinition, pool: &VariablePool) -> StepResult<ConsensusParams> {
    let required_votes = as_count(
        &resolve_required(step, "required_votes", pool)?,
        "required_votes",
    )?;
    let mut params = ConsensusParams::new(required_votes);
    if let Some(class_aware) = optional(step, "class_aware", pool)? {
        params.class_aware = class_aware.expect_bool("class_aware")?;
    }
    if let Some(iou) = optional(step, "iou_threshold", pool)? {
        params.iou_threshold = iou.expect_f64("iou_threshold")?;
    }
    if let Some(confidence) = optional(step, "confidence", pool)? {
        params.confidence = confidence.expect_f64("confidence")?;
    }
    params.classes_to_consider =
        resolve(step, "classes_to_consider", pool)?.optional_string_list("classes_to_consider")?;
    params.required_objects =
        RequiredObjects::from_segment(&resolve(step, "required_objects", pool)?, "required_objects")?;
    params.presence_confidence_aggregation =
        aggregation(step, "presence_confidence_aggregation", params.presence_confidence_aggregation)?;
    params.detections_merge_confidence_aggregation = aggregation(
        step,
        "detections_merge_confidence_aggregation",
        params.detections_merge_confidence_aggregation,
    )?;
    params.detections_merge_coordinates_aggregation = aggregation(
        step,
        "detections_merge_coordinates_aggregation",
        params.detections_merge_coordinates_aggregation,
    )?;
    Ok(params)
}

fn optional(step: &StepDefinition, field: &str, pool: &VariablePool) -> StepResult<Option<Segment>> {
    let value = resolve(step, field, pool)?;
    Ok((!value.is_none()).then_some(value))
}

fn aggregation(
    step: &StepDefinition,
    field: &str,
    default: AggregationMode,
) -> StepResult<AggregationMode> {
    match step.raw(field) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            StepError::ConfigError(format!("step '{}': invalid {}: {}", step.name, field, e))
        }),
    }
}

fn consensus_record(outcome: ConsensusOutcome, image: Segment) -> OutputMap {
    let presence = outcome
        .presence_confidence
        .into_iter()
        .map(|(class, confidence)| (class, Segment::Float(confidence)))
        .collect();
    let mut record = OutputMap::new();
    record.insert(PREDICTIONS_FIELD.to_string(), Segment::Detections(outcome.detections));
    record.insert(PARENT_ID_FIELD.to_string(), outcome.parent_id.into());
    record.insert(OBJECT_PRESENT_FIELD.to_string(), Segment::Boolean(outcome.object_present));
    record.insert(PRESENCE_CONFIDENCE_FIELD.to_string(), Segment::Object(presence));
    record.insert(IMAGE_FIELD.to_string(), image);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::test_support::{context, detection, pool};
    use serde_json::json;

    fn predictions_output(lists: Vec<Vec<Detection>>) -> BatchShape<OutputMap> {
        BatchShape::Batch(
            lists
                .into_iter()
                .map(|dets| {
                    let mut record = OutputMap::new();
                    record.insert(PREDICTIONS_FIELD.to_string(), Segment::Detections(dets));
                    record.insert(IMAGE_FIELD.to_string(), json_meta(640, 480));
                    record
                })
                .collect(),
        )
    }

    fn json_meta(width: i64, height: i64) -> Segment {
        Segment::from_value(&json!({"width": width, "height": height}))
    }

    fn consensus_step(sources: serde_json::Value) -> StepDefinition {
        StepDefinition::new("DetectionsConsensus", "consensus")
            .with_field("predictions", sources)
            .with_field("required_votes", 2)
            .with_field("class_aware", false)
    }

    #[tokio::test]
    async fn test_consensus_over_two_models() {
        let pool = pool(
            vec![],
            vec![
                ("a", predictions_output(vec![vec![detection("a1", "car", 0.9, 50.0, 50.0, 20.0, 20.0)]])),
                ("b", predictions_output(vec![vec![detection("b1", "car", 0.7, 50.0, 50.0, 20.0, 20.0)]])),
            ],
        );
        let step = consensus_step(json!(["$steps.a.predictions", "$steps.b.predictions"]));
        let result = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap();
        let records = match result.outputs.unwrap() {
            BatchShape::Batch(records) => records,
            other => panic!("expected batch, got {:?}", other),
        };
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record[OBJECT_PRESENT_FIELD], Segment::Boolean(true));
        assert_eq!(record[PARENT_ID_FIELD], Segment::String("img".into()));
        assert_eq!(record[IMAGE_FIELD], json_meta(640, 480));
        match &record[PREDICTIONS_FIELD] {
            Segment::Detections(dets) => {
                assert_eq!(dets.len(), 1);
                assert_eq!(dets[0].id, "id-0");
            }
            other => panic!("expected detections, got {:?}", other),
        }
        match &record[PRESENCE_CONFIDENCE_FIELD] {
            Segment::Object(map) => assert!(map.contains_key("any_object")),
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_flat_sources_give_single_record() {
        let pool = pool(
            vec![
                ("a", Segment::Detections(vec![detection("a1", "car", 0.9, 50.0, 50.0, 20.0, 20.0)])),
                ("b", Segment::Detections(vec![])),
            ],
            vec![],
        );
        let step = consensus_step(json!(["$inputs.a", "$inputs.b"]));
        let result = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap();
        match result.outputs.unwrap() {
            BatchShape::Single(record) => {
                assert_eq!(record[OBJECT_PRESENT_FIELD], Segment::Boolean(false));
                assert_eq!(record[IMAGE_FIELD], Segment::None);
            }
            other => panic!("expected single record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_size_mismatch_names_step() {
        let pool = pool(
            vec![],
            vec![
                ("a", predictions_output(vec![vec![], vec![]])),
                ("b", predictions_output(vec![vec![], vec![], vec![]])),
            ],
        );
        let step = consensus_step(json!(["$steps.a.predictions", "$steps.b.predictions"]));
        let err = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap_err();
        assert!(
            matches!(&err, StepError::ExecutionGraphError(msg) if msg.ends_with("step: consensus")),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn test_empty_source_list() {
        let pool = pool(vec![], vec![]);
        let step = consensus_step(json!([]));
        let err = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ExecutionGraphError(msg) if msg.contains("at least one source")));
    }

    #[tokio::test]
    async fn test_required_votes_is_required() {
        let pool = pool(vec![("a", Segment::Detections(vec![]))], vec![]);
        let step = StepDefinition::new("DetectionsConsensus", "consensus")
            .with_field("predictions", json!(["$inputs.a"]));
        let err = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_aggregation_modes_from_definition() {
        let pool = pool(
            vec![
                ("a", Segment::Detections(vec![detection("a1", "car", 0.9, 50.0, 50.0, 20.0, 20.0)])),
                ("b", Segment::Detections(vec![detection("b1", "car", 0.5, 50.0, 50.0, 30.0, 30.0)])),
            ],
            vec![],
        );
        let step = consensus_step(json!(["$inputs.a", "$inputs.b"]))
            .with_field("detections_merge_confidence_aggregation", "min")
            .with_field("detections_merge_coordinates_aggregation", "max");
        let result = DetectionsConsensusExecutor
            .execute(&step, &pool, &context())
            .await
            .unwrap();
        let record = match result.outputs.unwrap() {
            BatchShape::Single(record) => record,
            other => panic!("expected single record, got {:?}", other),
        };
        match &record[PREDICTIONS_FIELD] {
            Segment::Detections(dets) => {
                assert_eq!(dets[0].confidence, 0.5);
                assert_eq!(dets[0].width, 30.0);
            }
            other => panic!("expected detections, got {:?}", other),
        }

        let bad = consensus_step(json!(["$inputs.a"]))
            .with_field("presence_confidence_aggregation", "median");
        let err = DetectionsConsensusExecutor
            .execute(&bad, &pool, &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::ConfigError(_)));
    }
}
