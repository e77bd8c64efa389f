use serde_json::{json, Value};
use std::sync::Arc;

use visionflow::core::{BatchShape, OutputsLookup, RuntimeContext, RuntimeParameters, VariablePool};
use visionflow::dsl::StepDefinition;
use visionflow::{FakeIdGenerator, Segment, StepError, StepExecutorRegistry};

fn detection_json(id: &str, parent_id: &str, class_name: &str, confidence: f64, x: f64) -> Value {
    json!({
        "detection_id": id,
        "parent_id": parent_id,
        "class": class_name,
        "class_id": if class_name == "car" { 1 } else { 2 },
        "confidence": confidence,
        "x": x,
        "y": 50.0,
        "width": 20.0,
        "height": 20.0,
    })
}

fn pool(inputs: Vec<(&str, Value)>) -> VariablePool {
    let runtime: RuntimeParameters = inputs
        .into_iter()
        .map(|(name, value)| (name.to_string(), Segment::from_value(&value)))
        .collect();
    VariablePool::new(Arc::new(runtime), Arc::new(OutputsLookup::new()))
}

fn context() -> RuntimeContext {
    RuntimeContext::default().with_id_generator(Arc::new(FakeIdGenerator::new("n".to_string())))
}

fn records(output: &BatchShape<visionflow::core::OutputMap>) -> Vec<Value> {
    output
        .iter()
        .map(|record| {
            Value::Object(
                record
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            )
        })
        .collect()
}

#[test]
fn test_registry_knows_every_step_type() {
    let registry = StepExecutorRegistry::new();
    let mut types = registry.registered_types();
    types.sort();
    assert_eq!(
        types,
        vec![
            "AbsoluteStaticCrop",
            "Condition",
            "Crop",
            "DetectionFilter",
            "DetectionOffset",
            "DetectionsConsensus",
            "Florence2Model",
            "LMM",
            "OCRModel",
            "ObjectDetectionModel",
            "RelativeStaticCrop",
        ]
    );
}

#[tokio::test]
async fn test_compound_filter_on_json_detections() {
    let registry = StepExecutorRegistry::new();
    let executor = registry.get("DetectionFilter").unwrap();
    let pool = pool(vec![(
        "dets",
        json!([
            detection_json("a", "img", "car", 0.9, 20.0),
            detection_json("b", "img", "car", 0.3, 40.0),
            detection_json("c", "img", "dog", 0.95, 60.0),
        ]),
    )]);
    let step = StepDefinition::new("DetectionFilter", "keep_confident_cars")
        .with_field("predictions", "$inputs.dets")
        .with_field(
            "filter_definition",
            json!({
                "type": "CompoundDetectionFilterDefinition",
                "left": {"type": "DetectionFilterDefinition", "field_name": "class", "operator": "equal", "reference_value": "car"},
                "operator": "and",
                "right": {"type": "DetectionFilterDefinition", "field_name": "confidence", "operator": "greater_or_equal_than", "reference_value": 0.5},
            }),
        );

    let result = executor.execute(&step, &pool, &context()).await.unwrap();
    let output = result.outputs.unwrap();
    let kept = records(&output);
    assert_eq!(kept.len(), 1);
    let predictions = kept[0]["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0]["detection_id"], json!("a"));
}

#[tokio::test]
async fn test_unknown_filter_type_is_structural_error() {
    let registry = StepExecutorRegistry::new();
    let executor = registry.get("DetectionFilter").unwrap();
    let pool = pool(vec![("dets", json!([detection_json("a", "img", "car", 0.9, 20.0)]))]);
    let step = StepDefinition::new("DetectionFilter", "f")
        .with_field("predictions", "$inputs.dets")
        .with_field("filter_definition", json!({"type": "RegexFilter"}));
    let err = executor.execute(&step, &pool, &context()).await.unwrap_err();
    assert!(matches!(err, StepError::ExecutionGraphError(_)));
    assert!(err.is_structural());
}

#[tokio::test]
async fn test_consensus_over_batched_inputs() {
    let registry = StepExecutorRegistry::new();
    let executor = registry.get("DetectionsConsensus").unwrap();
    let pool = pool(vec![
        (
            "first",
            json!([
                [detection_json("a0", "frame-0", "car", 0.9, 50.0)],
                [detection_json("a1", "frame-1", "car", 0.8, 50.0)],
            ]),
        ),
        (
            "second",
            json!([
                [detection_json("b0", "frame-0", "car", 0.7, 52.0)],
                [],
            ]),
        ),
    ]);
    let step = StepDefinition::new("DetectionsConsensus", "vote")
        .with_field("predictions", json!(["$inputs.first", "$inputs.second"]))
        .with_field("required_votes", 2);

    let result = executor.execute(&step, &pool, &context()).await.unwrap();
    let output = result.outputs.unwrap();
    assert!(output.is_batch());
    let per_frame = records(&output);
    assert_eq!(per_frame.len(), 2);

    assert_eq!(per_frame[0]["parent_id"], json!("frame-0"));
    assert_eq!(per_frame[0]["object_present"], json!(true));
    let merged = per_frame[0]["predictions"].as_array().unwrap();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0]["x"], json!(51.0));
    assert_eq!(merged[0]["parent_id"], json!("frame-0"));

    // a single vote is not enough
    assert_eq!(per_frame[1]["parent_id"], json!("frame-1"));
    assert_eq!(per_frame[1]["object_present"], json!(false));
    assert_eq!(per_frame[1]["predictions"], json!([]));
}

#[tokio::test]
async fn test_consensus_rejects_mismatched_batches() {
    let registry = StepExecutorRegistry::new();
    let executor = registry.get("DetectionsConsensus").unwrap();
    let pool = pool(vec![
        ("first", json!([[detection_json("a0", "frame-0", "car", 0.9, 50.0)], []])),
        ("second", json!([[detection_json("b0", "frame-0", "car", 0.9, 50.0)]])),
    ]);
    let step = StepDefinition::new("DetectionsConsensus", "vote")
        .with_field("predictions", json!(["$inputs.first", "$inputs.second"]))
        .with_field("required_votes", 1);
    let err = executor.execute(&step, &pool, &context()).await.unwrap_err();
    assert!(matches!(err, StepError::ExecutionGraphError(_)));
}

#[tokio::test]
async fn test_condition_with_unknown_operator_fails() {
    let registry = StepExecutorRegistry::new();
    let executor = registry.get("Condition").unwrap();
    let step = StepDefinition::new("Condition", "c")
        .with_field("left", 1)
        .with_field("operator", "roughly")
        .with_field("right", 1)
        .with_field("step_if_true", "$steps.a")
        .with_field("step_if_false", "$steps.b");
    assert!(executor
        .execute(&step, &pool(vec![]), &context())
        .await
        .is_err());
}
