use serde::{Deserialize, Serialize};

/// Rounds to the nearest integer, ties to even, as every piece of box math
/// in the engine does.
#[inline]
pub fn round_coordinate(value: f64) -> f64 {
    value.round_ties_even()
}

/// A single detected object. `(x, y)` is the box center, `(width, height)`
/// its extent, all in pixels of the image named by `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "detection_id")]
    pub id: String,
    pub parent_id: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub class_id: i64,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Integer corner coordinates derived from a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x_min: i64,
    pub y_min: i64,
    pub x_max: i64,
    pub y_max: i64,
}

impl BoundingBox {
    /// Builds corners from a center and an extent: `min = round(c - e/2)`,
    /// `max = round(min + e)`.
    pub fn from_center(x: f64, y: f64, width: f64, height: f64) -> Self {
        let x_min = round_coordinate(x - width / 2.0);
        let y_min = round_coordinate(y - height / 2.0);
        Self {
            x_min: x_min as i64,
            y_min: y_min as i64,
            x_max: round_coordinate(x_min + width) as i64,
            y_max: round_coordinate(y_min + height) as i64,
        }
    }

    /// Area under the inclusive pixel convention.
    pub fn inclusive_area(&self) -> i64 {
        (self.x_max - self.x_min + 1) * (self.y_max - self.y_min + 1)
    }

    /// Intersection over union, counting both edges as covered pixels.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let x_a = self.x_min.max(other.x_min);
        let y_a = self.y_min.max(other.y_min);
        let x_b = self.x_max.min(other.x_max);
        let y_b = self.y_max.min(other.y_max);
        let intersection = (x_b - x_a + 1).max(0) * (y_b - y_a + 1).max(0);
        let union = self.inclusive_area() + other.inclusive_area() - intersection;
        if union <= 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }
}

impl Detection {
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_center(self.x, self.y, self.width, self.height)
    }

    pub fn iou(&self, other: &Detection) -> f64 {
        self.bounding_box().iou(&other.bounding_box())
    }

    /// Box size used to pick the largest/smallest member of a group.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Reads a field by its serialized name, for filter predicates.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        use serde_json::json;
        let value = match name {
            "detection_id" | "id" => json!(self.id),
            "parent_id" => json!(self.parent_id),
            "class" | "class_name" => json!(self.class_name),
            "class_id" => json!(self.class_id),
            "confidence" => json!(self.confidence),
            "x" => json!(self.x),
            "y" => json!(self.y),
            "width" => json!(self.width),
            "height" => json!(self.height),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(x: f64, y: f64, width: f64, height: f64) -> Detection {
        Detection {
            id: "d".into(),
            parent_id: "image".into(),
            class_name: "car".into(),
            class_id: 1,
            confidence: 0.9,
            x,
            y,
            width,
            height,
        }
    }

    #[test]
    fn test_bounding_box_from_center() {
        let bbox = detection(10.0, 20.0, 4.0, 6.0).bounding_box();
        assert_eq!(
            bbox,
            BoundingBox {
                x_min: 8,
                y_min: 17,
                x_max: 12,
                y_max: 23
            }
        );
    }

    #[test]
    fn test_rounding_ties_to_even() {
        assert_eq!(round_coordinate(2.5), 2.0);
        assert_eq!(round_coordinate(3.5), 4.0);
        assert_eq!(round_coordinate(-2.5), -2.0);
        assert_eq!(round_coordinate(1.4), 1.0);
    }

    #[test]
    fn test_iou_identical_boxes() {
        let a = detection(50.0, 50.0, 20.0, 10.0);
        assert!((a.iou(&a.clone()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_iou_inclusive_pixel_convention() {
        let a = detection(0.0, 0.0, 10.0, 10.0);
        let b = detection(4.0, 0.0, 10.0, 10.0);
        // a: [-5, 5], b: [-1, 9] on x; both [-5, 5] on y
        let expected = 77.0 / 165.0;
        assert!((a.iou(&b) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        let a = detection(0.0, 0.0, 4.0, 4.0);
        let b = detection(100.0, 100.0, 4.0, 4.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_field_access() {
        let d = detection(1.0, 2.0, 3.0, 4.0);
        assert_eq!(d.field("class"), Some(serde_json::json!("car")));
        assert_eq!(d.field("confidence"), Some(serde_json::json!(0.9)));
        assert_eq!(d.field("unknown"), None);
    }

    #[test]
    fn test_serde_field_names() {
        let value = serde_json::to_value(detection(1.0, 2.0, 3.0, 4.0)).unwrap();
        assert_eq!(value["class"], "car");
        assert_eq!(value["detection_id"], "d");
        let back: Detection = serde_json::from_value(value).unwrap();
        assert_eq!(back.class_name, "car");
    }
}
