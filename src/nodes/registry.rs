use std::collections::HashMap;
use std::sync::Arc;

use super::consensus::DetectionsConsensusExecutor;
use super::control_flow::ConditionExecutor;
use super::crop::{CropExecutor, StaticCropExecutor, StaticCropMode};
use super::detection_transform::{DetectionFilterExecutor, DetectionOffsetExecutor};
use super::executor::StepExecutor;
use super::models::{
    Florence2ModelExecutor, LmmExecutor, ObjectDetectionModelExecutor, OcrModelExecutor,
};

/// Registry of step executors by step type
pub struct StepExecutorRegistry {
    executors: HashMap<String, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    /// Registry with every built-in step type.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("Crop", Arc::new(CropExecutor));
        registry.register(
            "AbsoluteStaticCrop",
            Arc::new(StaticCropExecutor::new(StaticCropMode::Absolute)),
        );
        registry.register(
            "RelativeStaticCrop",
            Arc::new(StaticCropExecutor::new(StaticCropMode::Relative)),
        );
        registry.register("Condition", Arc::new(ConditionExecutor));
        registry.register("DetectionFilter", Arc::new(DetectionFilterExecutor));
        registry.register("DetectionOffset", Arc::new(DetectionOffsetExecutor));
        registry.register("DetectionsConsensus", Arc::new(DetectionsConsensusExecutor));
        registry.register("ObjectDetectionModel", Arc::new(ObjectDetectionModelExecutor));
        registry.register("OCRModel", Arc::new(OcrModelExecutor));
        registry.register("LMM", Arc::new(LmmExecutor));
        registry.register("Florence2Model", Arc::new(Florence2ModelExecutor));
        registry
    }

    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, step_type: &str, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_type.to_string(), executor);
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.executors.contains_key(step_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for StepExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
