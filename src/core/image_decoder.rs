//! Turning workflow images into RGB pixel buffers.

use std::sync::Arc;

use image::RgbImage;

use crate::domain::model::{ChannelOrder, ImageData, ImageSize, WorkflowImage};
use crate::error::StepResult;

/// Pixels as returned by a decoder, plus whether they are already RGB.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub buffer: Arc<RgbImage>,
    pub is_rgb: bool,
}

pub trait ImageDecoder: Send + Sync {
    fn decode(&self, image: &WorkflowImage) -> StepResult<DecodedImage>;
}

/// Decodes encoded payloads with the `image` crate and passes pixel
/// buffers through, flagging BGR buffers as non-RGB.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultImageDecoder;

impl ImageDecoder for DefaultImageDecoder {
    fn decode(&self, image: &WorkflowImage) -> StepResult<DecodedImage> {
        match &image.data {
            ImageData::Encoded(bytes) => {
                let decoded = image::load_from_memory(bytes.as_slice())?.to_rgb8();
                Ok(DecodedImage {
                    buffer: Arc::new(decoded),
                    is_rgb: true,
                })
            }
            ImageData::Pixels { buffer, order } => Ok(DecodedImage {
                buffer: buffer.clone(),
                is_rgb: *order == ChannelOrder::Rgb,
            }),
        }
    }
}

/// Decodes `image` and reverses channels when the decoder reports a non-RGB
/// buffer, so geometry runs in the frame detections are expressed in.
pub fn decode_rgb(decoder: &dyn ImageDecoder, image: &WorkflowImage) -> StepResult<Arc<RgbImage>> {
    let decoded = decoder.decode(image)?;
    if decoded.is_rgb {
        return Ok(decoded.buffer);
    }
    let mut buffer = (*decoded.buffer).clone();
    for pixel in buffer.pixels_mut() {
        pixel.0.swap(0, 2);
    }
    Ok(Arc::new(buffer))
}

/// Size of the frame an image ultimately came from: the recorded origin
/// for crops, otherwise the decoded dimensions.
pub fn origin_size(image: &WorkflowImage, buffer: &RgbImage) -> ImageSize {
    image
        .origin_coordinates
        .map(|origin| origin.origin_size)
        .unwrap_or(ImageSize {
            width: buffer.width(),
            height: buffer.height(),
        })
}
