use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::model::{Detection, ImageSize, WorkflowImage};

/// A model loaded by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelHandle {
    pub model_id: String,
}

impl ModelHandle {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
        }
    }
}

/// Task-specific part of an inference request.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceTask {
    ObjectDetection {
        confidence: Option<f64>,
        iou_threshold: Option<f64>,
        class_filter: Option<Vec<String>>,
        max_detections: Option<u64>,
    },
    Ocr,
    Lmm {
        prompt: String,
    },
    /// Florence-2 style multi-task request: `prompt` is the task token,
    /// followed by the task phrases when the task takes any.
    Florence2 {
        vision_task: String,
        prompt: String,
    },
}

impl InferenceTask {
    pub fn name(&self) -> &'static str {
        match self {
            InferenceTask::ObjectDetection { .. } => "object-detection",
            InferenceTask::Ocr => "ocr",
            InferenceTask::Lmm { .. } => "lmm",
            InferenceTask::Florence2 { .. } => "florence-2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub image: WorkflowImage,
    pub task: InferenceTask,
}

/// What a provider returns. Detection models fill `predictions`; text and
/// multimodal models fill `text` and `structured`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    #[serde(default)]
    pub predictions: Vec<Detection>,
    #[serde(default)]
    pub image: Option<ImageSize>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub structured: Option<Value>,
}
