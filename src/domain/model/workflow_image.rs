use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Where a crop sits inside the frame it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginCoordinates {
    pub center_x: f64,
    pub center_y: f64,
    pub origin_size: ImageSize,
}

/// Channel order of an in-memory pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Image payload: either still encoded (PNG, JPEG, ...) or decoded pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    Encoded(Arc<Vec<u8>>),
    Pixels {
        buffer: Arc<RgbImage>,
        order: ChannelOrder,
    },
}

/// An image flowing through a workflow, together with its provenance.
///
/// Payloads are shared behind `Arc` and never mutated, so clones are cheap
/// and concurrently running branches can hold on to them safely.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowImage {
    pub parent_id: String,
    pub data: ImageData,
    pub origin_coordinates: Option<OriginCoordinates>,
}

impl WorkflowImage {
    pub fn from_bytes(parent_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            parent_id: parent_id.into(),
            data: ImageData::Encoded(Arc::new(bytes)),
            origin_coordinates: None,
        }
    }

    pub fn from_rgb(parent_id: impl Into<String>, buffer: RgbImage) -> Self {
        Self::from_pixels(parent_id, buffer, ChannelOrder::Rgb)
    }

    pub fn from_pixels(parent_id: impl Into<String>, buffer: RgbImage, order: ChannelOrder) -> Self {
        Self {
            parent_id: parent_id.into(),
            data: ImageData::Pixels {
                buffer: Arc::new(buffer),
                order,
            },
            origin_coordinates: None,
        }
    }

    pub fn with_origin(mut self, origin: OriginCoordinates) -> Self {
        self.origin_coordinates = Some(origin);
        self
    }

    /// Dimensions when known without decoding.
    pub fn pixel_size(&self) -> Option<ImageSize> {
        match &self.data {
            ImageData::Pixels { buffer, .. } => Some(ImageSize {
                width: buffer.width(),
                height: buffer.height(),
            }),
            ImageData::Encoded(_) => None,
        }
    }

    /// Metadata reported instead of pixels when the image is serialized.
    pub fn metadata(&self) -> serde_json::Value {
        let mut meta = serde_json::json!({
            "type": match self.data {
                ImageData::Encoded(_) => "encoded",
                ImageData::Pixels { .. } => "pixels",
            },
            "parent_id": self.parent_id,
        });
        if let Some(size) = self.pixel_size() {
            meta["width"] = size.width.into();
            meta["height"] = size.height.into();
        }
        if let Some(origin) = &self.origin_coordinates {
            meta["origin_coordinates"] = serde_json::to_value(origin).unwrap_or_default();
        }
        meta
    }
}
