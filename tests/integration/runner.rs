use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use visionflow::dsl::{parse_dsl, DslFormat};
use visionflow::inference::{
    InferenceRequest, InferenceResponse, ModelHandle, ModelProvider, ModelProviderError,
};
use visionflow::{
    Detection, EngineConfig, FakeIdGenerator, GraphEngineEvent, Segment, StepError,
    WorkflowError, WorkflowImage, WorkflowRunner, WorkflowRunnerBuilder,
};

/// Answers every inference for `model_id` with a fixed set of detections.
#[derive(Default)]
struct ScriptedProvider {
    detections: HashMap<String, Vec<Detection>>,
    failing: Vec<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    loaded: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn with_model(mut self, model_id: &str, detections: Vec<Detection>) -> Self {
        self.detections.insert(model_id.to_string(), detections);
        self
    }

    fn failing(mut self, model_id: &str) -> Self {
        self.failing.push(model_id.to_string());
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn load_model(
        &self,
        model_id: &str,
        _api_key: Option<&str>,
    ) -> Result<ModelHandle, ModelProviderError> {
        if !self.detections.contains_key(model_id) && !self.failing.iter().any(|m| m == model_id) {
            return Err(ModelProviderError::ModelNotFound(model_id.to_string()));
        }
        self.loaded.lock().push(model_id.to_string());
        Ok(ModelHandle::new(model_id))
    }

    async fn infer(
        &self,
        model: &ModelHandle,
        _request: InferenceRequest,
    ) -> Result<InferenceResponse, ModelProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(&model.model_id) {
            return Err(ModelProviderError::InferenceFailed(format!(
                "{} crashed",
                model.model_id
            )));
        }
        Ok(InferenceResponse {
            predictions: self.detections[&model.model_id].clone(),
            ..Default::default()
        })
    }
}

fn detection(class_name: &str, confidence: f64, x: f64, y: f64, width: f64, height: f64) -> Detection {
    Detection {
        id: String::new(),
        parent_id: String::new(),
        class_name: class_name.to_string(),
        class_id: 0,
        confidence,
        x,
        y,
        width,
        height,
    }
}

fn image(width: u32, height: u32) -> Segment {
    Segment::Image(WorkflowImage::from_rgb("", RgbImage::new(width, height)))
}

fn runner(workflow: Value, provider: ScriptedProvider) -> WorkflowRunnerBuilder {
    let spec = parse_dsl(&workflow.to_string(), DslFormat::Json).unwrap();
    WorkflowRunner::builder(spec)
        .model_provider(Arc::new(provider))
        .id_generator(Arc::new(FakeIdGenerator::new("det".to_string())))
}

fn field<'a>(value: &'a Value, name: &str) -> &'a str {
    value[name].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_detect_crop_detect_offset_keeps_provenance() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "cars", "image": "$inputs.image", "model_id": "cars/1"},
            {"type": "Crop", "name": "crop", "image": "$inputs.image", "detections": "$steps.cars.predictions"},
            {"type": "ObjectDetectionModel", "name": "plates", "image": "$steps.crop.crops", "model_id": "plates/1"},
            {"type": "DetectionOffset", "name": "padded", "predictions": "$steps.plates.predictions", "offset_x": 4, "offset_y": 2},
        ],
        "outputs": [
            {"type": "JsonField", "name": "cars", "selector": "$steps.cars.predictions"},
            {"type": "JsonField", "name": "crops", "selector": "$steps.crop.crops"},
            {"type": "JsonField", "name": "plates", "selector": "$steps.plates.predictions"},
            {"type": "JsonField", "name": "padded", "selector": "$steps.padded.predictions"},
        ]
    });
    let provider = ScriptedProvider::default()
        .with_model(
            "cars/1",
            vec![
                detection("car", 0.9, 30.0, 30.0, 20.0, 20.0),
                detection("car", 0.8, 70.0, 70.0, 20.0, 20.0),
            ],
        )
        .with_model("plates/1", vec![detection("plate", 0.7, 10.0, 10.0, 8.0, 4.0)]);

    let outputs = runner(workflow, provider)
        .input("image", image(100, 100))
        .run()
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    let result = &outputs[0];

    let cars = result["cars"].as_array().unwrap();
    assert_eq!(cars.len(), 2);
    assert!(cars.iter().all(|c| field(c, "parent_id") == "$inputs.image"));

    let crops = result["crops"].as_array().unwrap();
    assert_eq!(crops.len(), 2);
    for (crop, car) in crops.iter().zip(cars) {
        assert_eq!(field(crop, "parent_id"), field(car, "detection_id"));
        assert_eq!(crop["width"], json!(20));
        assert_eq!(crop["origin_coordinates"]["center_x"], car["x"]);
    }

    let plates = result["plates"].as_array().unwrap();
    let padded = result["padded"].as_array().unwrap();
    assert_eq!(plates.len(), 2);
    for ((plate_list, padded_list), crop) in plates.iter().zip(padded).zip(crops) {
        let plate = &plate_list[0];
        let padded = &padded_list[0];
        assert_eq!(field(plate, "parent_id"), field(crop, "parent_id"));
        assert_eq!(field(padded, "parent_id"), field(plate, "detection_id"));
        assert_ne!(field(padded, "detection_id"), field(plate, "detection_id"));
        assert_eq!(padded["width"], json!(12.0));
        assert_eq!(padded["height"], json!(6.0));
    }
}

#[tokio::test]
async fn test_consensus_drops_low_confidence_detection() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "model", "image": "$inputs.image", "model_id": "mixed/1"},
            {
                "type": "DetectionsConsensus",
                "name": "consensus",
                "predictions": ["$steps.model.predictions"],
                "required_votes": 1,
                "class_aware": false,
                "confidence": 0.3,
            },
        ],
        "outputs": [
            {"type": "JsonField", "name": "result", "selector": "$steps.consensus.*"},
        ]
    });
    let provider = ScriptedProvider::default().with_model(
        "mixed/1",
        vec![
            detection("car", 0.9, 20.0, 20.0, 10.0, 10.0),
            detection("car", 0.2, 70.0, 70.0, 10.0, 10.0),
        ],
    );

    let outputs = runner(workflow, provider)
        .input("image", image(100, 100))
        .run()
        .await
        .unwrap();
    let result = &outputs[0]["result"];
    let predictions = result["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0]["confidence"], json!(0.9));
    assert_eq!(field(result, "parent_id"), "$inputs.image");
    assert_eq!(result["object_present"], json!(true));
    assert_eq!(result["image"], json!({"width": 100, "height": 100}));
}

#[tokio::test]
async fn test_consensus_across_two_models_requires_both_votes() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "a", "image": "$inputs.image", "model_id": "a/1"},
            {"type": "ObjectDetectionModel", "name": "b", "image": "$inputs.image", "model_id": "b/1"},
            {
                "type": "DetectionsConsensus",
                "name": "consensus",
                "predictions": ["$steps.a.predictions", "$steps.b.predictions"],
                "required_votes": 2,
            },
        ],
        "outputs": [
            {"type": "JsonField", "name": "predictions", "selector": "$steps.consensus.predictions"},
        ]
    });
    let provider = ScriptedProvider::default()
        .with_model(
            "a/1",
            vec![
                detection("car", 0.8, 50.0, 50.0, 20.0, 20.0),
                detection("dog", 0.9, 10.0, 10.0, 6.0, 6.0),
            ],
        )
        .with_model("b/1", vec![detection("car", 0.6, 51.0, 50.0, 20.0, 20.0)]);

    let outputs = runner(workflow, provider)
        .input("image", image(100, 100))
        .run()
        .await
        .unwrap();
    let predictions = outputs[0]["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(field(&predictions[0], "class"), "car");
    let confidence = predictions[0]["confidence"].as_f64().unwrap();
    assert!((confidence - 0.7).abs() < 1e-9);
}

fn branching_workflow() -> Value {
    json!({
        "inputs": [
            {"type": "InferenceImage", "name": "image"},
            {"type": "InferenceParameter", "name": "mode", "default_value": "center"},
        ],
        "steps": [
            {
                "type": "Condition",
                "name": "route",
                "left": "$inputs.mode",
                "operator": "equal",
                "right": "center",
                "step_if_true": "$steps.center",
                "step_if_false": "$steps.corner",
            },
            {"type": "RelativeStaticCrop", "name": "center", "image": "$inputs.image",
             "x_center": 0.5, "y_center": 0.5, "width": 0.5, "height": 0.5},
            {"type": "AbsoluteStaticCrop", "name": "corner", "image": "$inputs.image",
             "x_center": 10, "y_center": 10, "width": 20, "height": 20},
            {"type": "ObjectDetectionModel", "name": "corner_cars", "image": "$steps.corner.crops", "model_id": "cars/1"},
        ],
        "outputs": [
            {"type": "JsonField", "name": "center", "selector": "$steps.center.crops"},
            {"type": "JsonField", "name": "corner", "selector": "$steps.corner.crops"},
            {"type": "JsonField", "name": "corner_cars", "selector": "$steps.corner_cars.predictions"},
        ]
    })
}

#[tokio::test]
async fn test_condition_prunes_untaken_branch() {
    let provider = ScriptedProvider::default().with_model("cars/1", vec![]);
    let (tx, mut rx) = mpsc::channel(64);
    let outputs = runner(branching_workflow(), provider)
        .input("image", image(100, 80))
        .events(tx)
        .run()
        .await
        .unwrap();

    let result = &outputs[0];
    assert_eq!(result["center"][0]["width"], json!(50));
    assert_eq!(result["center"][0]["height"], json!(40));
    assert_eq!(result["corner"], Value::Null);
    assert_eq!(result["corner_cars"], Value::Null);

    let mut skipped = Vec::new();
    let mut branch = None;
    while let Ok(event) = rx.try_recv() {
        match event {
            GraphEngineEvent::StepSkipped { step } => skipped.push(step),
            GraphEngineEvent::BranchSelected { next_step, .. } => branch = Some(next_step),
            _ => {}
        }
    }
    skipped.sort();
    assert_eq!(skipped, vec!["corner", "corner_cars"]);
    assert_eq!(branch.as_deref(), Some("center"));
}

#[tokio::test]
async fn test_condition_false_branch_runs_downstream_model() {
    let provider =
        ScriptedProvider::default().with_model("cars/1", vec![detection("car", 0.9, 5.0, 5.0, 4.0, 4.0)]);
    let outputs = runner(branching_workflow(), provider)
        .user_inputs(HashMap::from([("mode".to_string(), json!("corner"))]))
        .input("image", image(100, 80))
        .run()
        .await
        .unwrap();

    let result = &outputs[0];
    assert_eq!(result["center"], Value::Null);
    assert_eq!(result["corner"][0]["parent_id"], json!("$steps.corner"));
    // one crop for one input image: split like any per-image output
    let cars = result["corner_cars"].as_array().unwrap();
    assert_eq!(cars.len(), 1);
    assert_eq!(cars[0]["parent_id"], json!("$steps.corner"));
}

#[tokio::test]
async fn test_max_concurrency_bounds_parallel_steps() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "a", "image": "$inputs.image", "model_id": "m/1"},
            {"type": "ObjectDetectionModel", "name": "b", "image": "$inputs.image", "model_id": "m/1"},
            {"type": "ObjectDetectionModel", "name": "c", "image": "$inputs.image", "model_id": "m/1"},
        ],
        "outputs": []
    });

    let provider = Arc::new(
        ScriptedProvider::default()
            .with_model("m/1", vec![])
            .delayed(Duration::from_millis(40)),
    );
    let spec = parse_dsl(&workflow.to_string(), DslFormat::Json).unwrap();
    WorkflowRunner::builder(spec.clone())
        .model_provider(provider.clone())
        .input("image", image(10, 10))
        .config(EngineConfig {
            parallel_enabled: true,
            max_concurrency: 1,
        })
        .run()
        .await
        .unwrap();
    assert_eq!(provider.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(provider.loaded.lock().len(), 3);

    let provider = Arc::new(
        ScriptedProvider::default()
            .with_model("m/1", vec![])
            .delayed(Duration::from_millis(40)),
    );
    WorkflowRunner::builder(spec)
        .model_provider(provider.clone())
        .input("image", image(10, 10))
        .run()
        .await
        .unwrap();
    assert!(provider.max_in_flight.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_model_failure_fails_the_run() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "broken", "image": "$inputs.image", "model_id": "bad/1"},
            {"type": "Crop", "name": "crop", "image": "$inputs.image", "detections": "$steps.broken.predictions"},
        ],
        "outputs": [{"type": "JsonField", "name": "crops", "selector": "$steps.crop.crops"}]
    });
    let provider = ScriptedProvider::default().failing("bad/1");
    let (tx, mut rx) = mpsc::channel(64);
    let err = runner(workflow, provider)
        .input("image", image(10, 10))
        .events(tx)
        .run()
        .await
        .unwrap_err();

    match err {
        WorkflowError::StepExecutionError { step, source } => {
            assert_eq!(step, "broken");
            assert!(matches!(
                source,
                StepError::ModelProviderError(ModelProviderError::InferenceFailed(_))
            ));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let mut started = Vec::new();
    let mut failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            GraphEngineEvent::StepStarted { step, .. } => started.push(step),
            GraphEngineEvent::StepFailed { step, structural, .. } => failures.push((step, structural)),
            _ => {}
        }
    }
    assert_eq!(started, vec!["broken"]);
    // provider failures are not workflow defects
    assert_eq!(failures, vec![("broken".to_string(), false)]);
}

#[tokio::test]
async fn test_missing_input_is_reported() {
    let workflow = json!({
        "inputs": [{"type": "InferenceImage", "name": "image"}],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "cars", "image": "$inputs.image", "model_id": "cars/1"},
        ],
        "outputs": []
    });
    let provider = ScriptedProvider::default().with_model("cars/1", vec![]);
    let err = runner(workflow, provider).run().await.unwrap_err();
    assert!(matches!(
        err.step_error(),
        Some(StepError::UnknownInput(name)) if name == "image"
    ));
}

#[tokio::test]
async fn test_image_batch_yields_one_result_per_image() {
    let workflow = json!({
        "inputs": [
            {"type": "InferenceImage", "name": "image"},
            {"type": "InferenceParameter", "name": "threshold", "default_value": 0.5},
        ],
        "steps": [
            {"type": "ObjectDetectionModel", "name": "cars", "image": "$inputs.image",
             "model_id": "cars/1", "confidence": "$inputs.threshold"},
        ],
        "outputs": [
            {"type": "JsonField", "name": "predictions", "selector": "$steps.cars.predictions"},
            {"type": "JsonField", "name": "threshold", "selector": "$inputs.threshold"},
        ]
    });
    let provider =
        ScriptedProvider::default().with_model("cars/1", vec![detection("car", 0.9, 5.0, 5.0, 4.0, 4.0)]);
    let batch = Segment::Batch(vec![
        Segment::Image(WorkflowImage::from_rgb("frame-0", RgbImage::new(10, 10))),
        Segment::Image(WorkflowImage::from_rgb("frame-1", RgbImage::new(10, 10))),
    ]);
    let outputs = runner(workflow, provider)
        .input("image", batch)
        .run()
        .await
        .unwrap();

    assert_eq!(outputs.len(), 2);
    for (index, result) in outputs.iter().enumerate() {
        let predictions = result["predictions"].as_array().unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(field(&predictions[0], "parent_id"), format!("frame-{}", index));
        assert_eq!(result["threshold"], json!(0.5));
    }
}
