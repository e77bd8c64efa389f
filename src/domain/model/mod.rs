//! Protocol-stable model types shared across layers.

mod detection;
mod workflow_image;
mod selector;

pub use detection::{round_coordinate, BoundingBox, Detection};
pub use workflow_image::{ChannelOrder, ImageData, ImageSize, OriginCoordinates, WorkflowImage};
pub use selector::{ParamRef, Selector, INPUTS_PREFIX, STEPS_PREFIX, WILDCARD_FIELD};
