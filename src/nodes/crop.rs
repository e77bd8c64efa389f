use async_trait::async_trait;
use image::{imageops, RgbImage};

use crate::core::image_decoder::{decode_rgb, origin_size};
use crate::core::outputs_lookup::OutputMap;
use crate::core::runtime_context::RuntimeContext;
use crate::core::segment::{BatchShape, Segment};
use crate::core::variable_pool::VariablePool;
use crate::domain::model::{round_coordinate, BoundingBox, OriginCoordinates, WorkflowImage};
use crate::dsl::schema::{StepDefinition, StepRunResult};
use crate::error::StepError;
use crate::nodes::executor::StepExecutor;
use crate::nodes::utils::{resolve_images, resolve_predictions, resolve_required, zip_broadcast, PARENT_ID_FIELD};

pub const CROPS_FIELD: &str = "crops";

/// Cuts `bbox` out of `buffer`, clamped to the image bounds.
pub fn crop_box(buffer: &RgbImage, bbox: &BoundingBox) -> RgbImage {
    let (width, height) = (i64::from(buffer.width()), i64::from(buffer.height()));
    let x_min = bbox.x_min.clamp(0, width);
    let y_min = bbox.y_min.clamp(0, height);
    let x_max = bbox.x_max.clamp(x_min, width);
    let y_max = bbox.y_max.clamp(y_min, height);
    imageops::crop_imm(
        buffer,
        x_min as u32,
        y_min as u32,
        (x_max - x_min) as u32,
        (y_max - y_min) as u32,
    )
    .to_image()
}

fn crops_record(crops: Vec<WorkflowImage>) -> OutputMap {
    let parent_ids = crops
        .iter()
        .map(|c| Segment::String(c.parent_id.clone()))
        .collect();
    let mut record = OutputMap::new();
    record.insert(
        CROPS_FIELD.to_string(),
        Segment::Batch(crops.into_iter().map(Segment::Image).collect()),
    );
    record.insert(PARENT_ID_FIELD.to_string(), Segment::Batch(parent_ids));
    record
}

// ================================
// Crop
// ================================

/// One crop per detection, parented to the detection it was cut around.
pub struct CropExecutor;

#[async_trait]
impl StepExecutor for CropExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let (detections, _) = resolve_predictions(step, "detections", pool)?;

        let mut crops = Vec::new();
        for (image, detections) in zip_broadcast(step, images, detections)? {
            let buffer = decode_rgb(context.image_decoder.as_ref(), &image)?;
            let origin = origin_size(&image, &buffer);
            for detection in &detections {
                let cropped = crop_box(&buffer, &detection.bounding_box());
                crops.push(
                    WorkflowImage::from_rgb(detection.id.clone(), cropped).with_origin(
                        OriginCoordinates {
                            center_x: detection.x,
                            center_y: detection.y,
                            origin_size: origin,
                        },
                    ),
                );
            }
        }
        tracing::trace!(step = %step.name, crops = crops.len(), "crop finished");
        Ok(StepRunResult::with_outputs(BatchShape::Single(crops_record(
            crops,
        ))))
    }
}

// ================================
// Static crops
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticCropMode {
    /// Center and extent in pixels.
    Absolute,
    /// Center and extent as fractions of the image size.
    Relative,
}

/// One fixed-region crop per input image, parented to the step itself.
pub struct StaticCropExecutor {
    mode: StaticCropMode,
}

impl StaticCropExecutor {
    pub fn new(mode: StaticCropMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl StepExecutor for StaticCropExecutor {
    async fn execute(
        &self,
        step: &StepDefinition,
        pool: &VariablePool,
        context: &RuntimeContext,
    ) -> Result<StepRunResult, StepError> {
        let images = resolve_images(step, "image", pool)?;
        let mut region = [0.0; 4];
        for (slot, field) in region.iter_mut().zip(["x_center", "y_center", "width", "height"]) {
            *slot = resolve_required(step, field, pool)?.expect_f64(field)?;
        }
        let parent_id = format!("$steps.{}", step.name);

        let mut crops = Vec::new();
        for image in images.into_vec() {
            let buffer = decode_rgb(context.image_decoder.as_ref(), &image)?;
            let [mut x_center, mut y_center, mut width, mut height] = region;
            if self.mode == StaticCropMode::Relative {
                let (image_w, image_h) = (f64::from(buffer.width()), f64::from(buffer.height()));
                x_center = round_coordinate(image_w * x_center);
                y_center = round_coordinate(image_h * y_center);
                width = round_coordinate(image_w * width);
                height = round_coordinate(image_h * height);
            }
            let bbox = BoundingBox::from_center(x_center, y_center, width, height);
            crops.push(
                WorkflowImage::from_rgb(parent_id.clone(), crop_box(&buffer, &bbox)).with_origin(
                    OriginCoordinates {
                        center_x: x_center,
                        center_y: y_center,
                        origin_size: origin_size(&image, &buffer),
                    },
                ),
            );
        }
        Ok(StepRunResult::with_outputs(BatchShape::Single(crops_record(
            crops,
        ))))
    }
}
