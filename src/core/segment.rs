//! Runtime values exchanged between steps.
//!
//! [`Segment`] is the tagged union of everything a selector can resolve to.
//! Batches are explicit ([`Segment::Batch`], [`BatchShape`]) instead of being
//! inferred from element types.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::model::{Detection, WorkflowImage};
use crate::error::StepError;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Segment {
    #[default]
    None,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Array(Vec<Segment>),
    Object(BTreeMap<String, Segment>),
    Image(WorkflowImage),
    Detections(Vec<Detection>),
    /// One element per image of a batch.
    Batch(Vec<Segment>),
}

/// A value for one image, or one value per image of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchShape<T> {
    Single(T),
    Batch(Vec<T>),
}

impl<T> BatchShape<T> {
    pub fn len(&self) -> usize {
        match self {
            BatchShape::Single(_) => 1,
            BatchShape::Batch(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, BatchShape::Batch(_))
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            BatchShape::Single(item) => vec![item],
            BatchShape::Batch(items) => items,
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            BatchShape::Single(item) => std::slice::from_ref(item).iter(),
            BatchShape::Batch(items) => items.iter(),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BatchShape<U> {
        match self {
            BatchShape::Single(item) => BatchShape::Single(f(item)),
            BatchShape::Batch(items) => BatchShape::Batch(items.into_iter().map(f).collect()),
        }
    }

    pub fn try_map<U, E>(self, mut f: impl FnMut(T) -> Result<U, E>) -> Result<BatchShape<U>, E> {
        Ok(match self {
            BatchShape::Single(item) => BatchShape::Single(f(item)?),
            BatchShape::Batch(items) => {
                BatchShape::Batch(items.into_iter().map(f).collect::<Result<_, _>>()?)
            }
        })
    }

    /// Rebuilds a value with the shape of `self` from per-element items.
    pub fn reshape<U>(&self, mut items: Vec<U>) -> BatchShape<U> {
        if matches!(self, BatchShape::Single(_)) && items.len() == 1 {
            if let Some(item) = items.pop() {
                return BatchShape::Single(item);
            }
        }
        BatchShape::Batch(items)
    }
}

impl<T: Into<Segment>> BatchShape<T> {
    pub fn into_segment(self) -> Segment {
        match self {
            BatchShape::Single(item) => item.into(),
            BatchShape::Batch(items) => Segment::Batch(items.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<Vec<Detection>> for Segment {
    fn from(detections: Vec<Detection>) -> Self {
        Segment::Detections(detections)
    }
}

impl From<WorkflowImage> for Segment {
    fn from(image: WorkflowImage) -> Self {
        Segment::Image(image)
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::String(s)
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::String(s.to_string())
    }
}

impl From<bool> for Segment {
    fn from(b: bool) -> Self {
        Segment::Boolean(b)
    }
}

impl From<f64> for Segment {
    fn from(f: f64) -> Self {
        Segment::Float(f)
    }
}

impl From<i64> for Segment {
    fn from(i: i64) -> Self {
        Segment::Integer(i)
    }
}

impl From<Option<String>> for Segment {
    fn from(s: Option<String>) -> Self {
        s.map(Segment::String).unwrap_or(Segment::None)
    }
}

impl Segment {
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => Segment::Array(arr.iter().map(Segment::from_value).collect()),
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    /// JSON rendering; images are reported by their metadata only.
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Integer(i) => serde_json::json!(i),
            Segment::Float(f) => serde_json::json!(f),
            Segment::String(s) => Value::String(s.clone()),
            Segment::Array(items) | Segment::Batch(items) => {
                Value::Array(items.iter().map(Segment::to_value).collect())
            }
            Segment::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Segment::Image(image) => image.metadata(),
            Segment::Detections(detections) => {
                Value::Array(detections.iter().map(detection_value).collect())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Segment::None => "none",
            Segment::Boolean(_) => "boolean",
            Segment::Integer(_) => "integer",
            Segment::Float(_) => "float",
            Segment::String(_) => "string",
            Segment::Array(_) => "array",
            Segment::Object(_) => "object",
            Segment::Image(_) => "image",
            Segment::Detections(_) => "detections",
            Segment::Batch(_) => "batch",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Segment::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn expect_f64(&self, what: &str) -> Result<f64, StepError> {
        self.as_f64().ok_or_else(|| type_error(what, "number", self))
    }

    pub fn expect_bool(&self, what: &str) -> Result<bool, StepError> {
        self.as_bool().ok_or_else(|| type_error(what, "boolean", self))
    }

    pub fn expect_string(&self, what: &str) -> Result<String, StepError> {
        self.as_str()
            .map(str::to_string)
            .ok_or_else(|| type_error(what, "string", self))
    }

    /// `None` maps to `Ok(None)`; anything else must be a number.
    pub fn optional_f64(&self, what: &str) -> Result<Option<f64>, StepError> {
        if self.is_none() {
            return Ok(None);
        }
        self.expect_f64(what).map(Some)
    }

    /// `None` maps to `Ok(None)`; anything else must be a list of strings.
    pub fn optional_string_list(&self, what: &str) -> Result<Option<Vec<String>>, StepError> {
        match self {
            Segment::None => Ok(None),
            Segment::Array(items) | Segment::Batch(items) => items
                .iter()
                .map(|item| item.expect_string(what))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            other => Err(type_error(what, "list of strings", other)),
        }
    }

    /// Reads an image input: one image, or a list/batch of images.
    pub fn to_images(&self, what: &str) -> Result<BatchShape<WorkflowImage>, StepError> {
        match self {
            Segment::Image(image) => Ok(BatchShape::Single(image.clone())),
            Segment::Batch(items) | Segment::Array(items) => items
                .iter()
                .map(|item| match item {
                    Segment::Image(image) => Ok(image.clone()),
                    other => Err(type_error(what, "image", other)),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(BatchShape::Batch),
            other => Err(type_error(what, "image", other)),
        }
    }

    /// Reads a predictions input.
    ///
    /// Engine-produced values carry their shape explicitly. JSON-supplied
    /// values are converted here: a list of detection objects is one image's
    /// predictions, a list of such lists is a batch.
    pub fn to_predictions(&self, what: &str) -> Result<BatchShape<Vec<Detection>>, StepError> {
        match self {
            Segment::Detections(detections) => Ok(BatchShape::Single(detections.clone())),
            Segment::Batch(items) => items
                .iter()
                .map(|item| item.to_detection_list(what))
                .collect::<Result<Vec<_>, _>>()
                .map(BatchShape::Batch),
            Segment::Array(items) if items.iter().all(|i| matches!(i, Segment::Array(_))) && !items.is_empty() => items
                .iter()
                .map(|item| item.to_detection_list(what))
                .collect::<Result<Vec<_>, _>>()
                .map(BatchShape::Batch),
            Segment::Array(_) => self.to_detection_list(what).map(BatchShape::Single),
            other => Err(type_error(what, "detections", other)),
        }
    }

    fn to_detection_list(&self, what: &str) -> Result<Vec<Detection>, StepError> {
        match self {
            Segment::Detections(detections) => Ok(detections.clone()),
            Segment::Array(items) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<Detection>(item.to_value()).map_err(|e| {
                        StepError::TypeError(format!("{}: invalid detection: {}", what, e))
                    })
                })
                .collect(),
            other => Err(type_error(what, "detections", other)),
        }
    }
}

fn type_error(what: &str, expected: &str, found: &Segment) -> StepError {
    StepError::TypeError(format!(
        "{}: expected {}, found {}",
        what,
        expected,
        found.type_name()
    ))
}

fn detection_value(detection: &Detection) -> Value {
    match serde_json::to_value(detection) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(detection = %detection.id, error = %e, "failed to render detection");
            Value::Null
        }
    }
}
