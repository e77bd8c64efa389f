//! Steps that delegate to the model provider.
//!
//! Each image of a batch is inferred concurrently. A single input image
//! yields a single output record, a batch yields one record per image.

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::json;

use crate::core::outputs_lookup::OutputMap;
use crate::core::runtime_context::RuntimeContext;
use crate::core::segment::{BatchShape, Segment};
use crate::core::variable_pool::VariablePool;
use crate::domain::model::{Detection, WorkflowImage};
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::{StepError, StepResult};
use crate::inference::{InferenceRequest, InferenceResponse, InferenceTask, ModelHandle};
use crate::nodes::consensus::voting::as_count;
use crate::nodes::executor::StepExecutor;
use crate::nodes::utils::{
    resolve, resolve_images, IMAGE_FIELD, PARENT_ID_FIELD, PREDICTIONS_FIELD,
};

pub const DEFAULT_OCR_MODEL: &str = "doctr";
pub const DEFAULT_LMM_MODEL: &str = "paligemma";
pub const DEFAULT_FLORENCE2_MODEL: &str = "florence-pretrains/1";
pub const DEFAULT_FLORENCE2_TASK: &str = "<OPEN_VOCABULARY_DETECTION>";

const FLORENCE2_TASKS: [&str; 10] = [
    "<OD>",
    "<CAPTION_TO_PHRASE_GROUNDING>",
    "<DENSE_REGION_CAPTION>",
    "<REGION_PROPOSAL>",
    "<OCR_WITH_REGION>",
    "<REFERRING_EXPRESSION_SEGMENTATION>",
    "<REGION_TO_SEGMENTATION>",
    "<OPEN_VOCABULARY_DETECTION>",
    "<REGION_TO_CATEGORY>",
    "<REGION_TO_DESCRIPTION>",
];

/// Tasks whose token is followed by the `<and>`-joined prompt phrases.
const FLORENCE2_PROMPTED_TASKS: [&str; 6] = [
    "<CAPTION_TO_PHRASE_GROUNDING>",
    "<REFERRING_EXPRESSION_SEGMENTATION>",
    "<REGION_TO_SEGMENTATION>",
    "<OPEN_VOCABULARY_DETECTION>",
    "<REGION_TO_CATEGORY>",
    "<REGION_TO_DESCRIPTION>",
];

fn model_id(
    step: &StepDefinition,
    pool: &VariablePool,
    default: Option<&str>,
) -> StepResult<String> {
    match (resolve(step, "model_id", pool)?, default) {
        (Segment::None, Some(default)) => Ok(default.to_string()),
        (Segment::None, None) => Err(StepError::ConfigError(format!(
            "step '{}' requires a model_id",
            step.name
        ))),
        (value, _) => value.expect_string("model_id"),
    }
}

/// Loads the model, then infers every image of `images` concurrently.
async fn infer_images(
    step: &StepDefinition,
    context: &RuntimeContext,
    model_id: &str,
    images: &BatchShape<WorkflowImage>,
    task: InferenceTask,
) -> StepResult<Vec<InferenceResponse>> {
    let provider = context.model_provider.as_ref();
    let model: ModelHandle = provider
        .load_model(model_id, context.api_key.as_deref())
        .await?;
    tracing::debug!(
        step = %step.name,
        model_id,
        task = task.name(),
        images = images.len(),
        "running inference"
    );
    let requests = images.iter().map(|image| {
        provider.infer(
            &model,
            InferenceRequest {
                image: image.clone(),
                task: task.clone(),
            },
        )
    });
    Ok(try_join_all(requests).await?)
}

/// Re-parents provider detections to `image`, naming the unnamed ones.
fn adopt_detections(
    image: &WorkflowImage,
    predictions: Vec<Detection>,
    context: &RuntimeContext,
) -> Vec<Detection> {
    predictions
        .into_iter()
        .map(|mut detection| {
            detection.parent_id = image.parent_id.clone();
            if detection.id.is_empty() {
                detection.id = context.id_generator.next_id();
            }
            detection
        })
        .collect()
}

fn image_meta(image: &WorkflowImage, response: &InferenceResponse) -> Segment {
    match response.image.or_else(|| image.pixel_size()) {
        Some(size) => Segment::from_value(&json!({"width": size.width, "height": size.height})),
        None => Segment::None,
    }
}

// ================================
// ObjectDetectionModel
// ================================

pub struct ObjectDetectionModelExecutor;

#[async_trait]
impl StepExecutor for ObjectDetectionModelExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let model_id = model_id(step, pool, None)?;
        let max_detections = match resolve(step, "max_detections", pool)? {
            Segment::None => None,
            value => Some(as_count(&value, "max_detections")?),
        };
        let task = InferenceTask::ObjectDetection {
            confidence: resolve(step, "confidence", pool)?.optional_f64("confidence")?,
            iou_threshold: resolve(step, "iou_threshold", pool)?.optional_f64("iou_threshold")?,
            class_filter: resolve(step, "class_filter", pool)?
                .optional_string_list("class_filter")?,
            max_detections,
        };

        let responses = infer_images(step, context, &model_id, &images, task).await?;
        let records = images
            .iter()
            .zip(responses)
            .map(|(image, response)| {
                let meta = image_meta(image, &response);
                let detections = adopt_detections(image, response.predictions, context);
                let mut record = OutputMap::new();
                record.insert(PREDICTIONS_FIELD.to_string(), Segment::Detections(detections));
                record.insert(PARENT_ID_FIELD.to_string(), image.parent_id.clone().into());
                record.insert(IMAGE_FIELD.to_string(), meta);
                record
            })
            .collect();
        Ok(StepRunResult::with_outputs(images.reshape(records)))
    }
}

// ================================
// OCRModel
// ================================

pub struct OcrModelExecutor;

#[async_trait]
impl StepExecutor for OcrModelExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let model_id = model_id(step, pool, Some(DEFAULT_OCR_MODEL))?;
        let responses = infer_images(step, context, &model_id, &images, InferenceTask::Ocr).await?;
        let records = images
            .iter()
            .zip(responses)
            .map(|(image, response)| {
                let mut record = OutputMap::new();
                record.insert("result".to_string(), response.text.unwrap_or_default().into());
                record.insert(PARENT_ID_FIELD.to_string(), image.parent_id.clone().into());
                record.insert("prediction_type".to_string(), "ocr".into());
                record
            })
            .collect();
        Ok(StepRunResult::with_outputs(images.reshape(records)))
    }
}

// ================================
// LMM
// ================================

/// Prompts a large multimodal model about each image.
pub struct LmmExecutor;

#[async_trait]
impl StepExecutor for LmmExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let model_id = model_id(step, pool, Some(DEFAULT_LMM_MODEL))?;
        let prompt = match resolve(step, "prompt", pool)? {
            Segment::None => {
                return Err(StepError::ConfigError(format!(
                    "step '{}' requires a prompt",
                    step.name
                )))
            }
            value => value.expect_string("prompt")?,
        };
        let task = InferenceTask::Lmm { prompt };
        let responses = infer_images(step, context, &model_id, &images, task).await?;
        let records = images
            .iter()
            .zip(responses)
            .map(|(image, response)| {
                let structured = response
                    .structured
                    .as_ref()
                    .map(Segment::from_value)
                    .unwrap_or_default();
                let mut record = OutputMap::new();
                record.insert("model_output".to_string(), response.text.unwrap_or_default().into());
                record.insert("structured_output".to_string(), structured);
                record.insert(PARENT_ID_FIELD.to_string(), image.parent_id.clone().into());
                record
            })
            .collect();
        Ok(StepRunResult::with_outputs(images.reshape(records)))
    }
}

// ================================
// Florence2Model
// ================================

/// Runs one task of a Florence-2 style multi-task model. Detection-style
/// answers come back as `predictions`; captions and other text as
/// `raw_output` and `structured_output`.
pub struct Florence2ModelExecutor;

impl Florence2ModelExecutor {
    fn prompt(step: &StepDefinition, vision_task: &str, phrases: &[String]) -> StepResult<String> {
        if !FLORENCE2_TASKS.contains(&vision_task) {
            return Err(StepError::ConfigError(format!(
                "step '{}': unknown vision_task {}",
                step.name, vision_task
            )));
        }
        if !FLORENCE2_PROMPTED_TASKS.contains(&vision_task) {
            return Ok(vision_task.to_string());
        }
        if phrases.is_empty() {
            return Err(StepError::ConfigError(format!(
                "step '{}': vision_task {} requires a prompt",
                step.name, vision_task
            )));
        }
        Ok(format!("{} {}", vision_task, phrases.join("<and>")))
    }
}

#[async_trait]
impl StepExecutor for Florence2ModelExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let model_id = model_id(step, pool, Some(DEFAULT_FLORENCE2_MODEL))?;
        let vision_task = match resolve(step, "vision_task", pool)? {
            Segment::None => DEFAULT_FLORENCE2_TASK.to_string(),
            value => value.expect_string("vision_task")?,
        };
        let phrases = match resolve(step, "prompt", pool)? {
            Segment::String(phrase) => vec![phrase],
            value => value.optional_string_list("prompt")?.unwrap_or_default(),
        };
        let prompt = Self::prompt(step, &vision_task, &phrases)?;
        let task = InferenceTask::Florence2 {
            vision_task,
            prompt,
        };

        let responses = infer_images(step, context, &model_id, &images, task).await?;
        let records = images
            .iter()
            .zip(responses)
            .map(|(image, response)| {
                let meta = image_meta(image, &response);
                let structured = response
                    .structured
                    .as_ref()
                    .map(Segment::from_value)
                    .unwrap_or_default();
                let raw_output = response.text.map(Segment::String).unwrap_or_default();
                let detections = adopt_detections(image, response.predictions, context);
                let mut record = OutputMap::new();
                record.insert(PREDICTIONS_FIELD.to_string(), Segment::Detections(detections));
                record.insert("raw_output".to_string(), raw_output);
                record.insert("structured_output".to_string(), structured);
                record.insert(PARENT_ID_FIELD.to_string(), image.parent_id.clone().into());
                record.insert(IMAGE_FIELD.to_string(), meta);
                record
            })
            .collect();
        Ok(StepRunResult::with_outputs(images.reshape(records)))
    }
}
