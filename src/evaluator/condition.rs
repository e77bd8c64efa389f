//! Detection filter expressions.
//!
//! Filter definitions arrive as JSON trees of `DetectionFilterDefinition`
//! leaves and `CompoundDetectionFilterDefinition` nodes. They are compiled
//! once into a [`FilterExpression`] and evaluated per detection.

use serde::Deserialize;
use serde_json::Value;

use super::operators::{compare, Operator};
use crate::core::segment::Segment;
use crate::domain::model::Detection;
use crate::error::{StepError, StepResult};

const COMPARISON_TYPE: &str = "DetectionFilterDefinition";
const COMPOUND_TYPE: &str = "CompoundDetectionFilterDefinition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Comparison {
        field_name: String,
        operator: Operator,
        reference_value: Segment,
    },
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
}

#[derive(Deserialize)]
struct ComparisonDefinition {
    field_name: String,
    operator: Operator,
    reference_value: Value,
}

#[derive(Deserialize)]
struct CompoundDefinition {
    left: Value,
    operator: BinaryOperator,
    right: Value,
}

impl FilterExpression {
    pub fn compile(definition: &Value) -> StepResult<Self> {
        let kind = definition
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StepError::ExecutionGraphError(
                    "Detected filter definition without a type".to_string(),
                )
            })?;
        match kind {
            COMPARISON_TYPE => {
                let def: ComparisonDefinition = serde_json::from_value(definition.clone())?;
                Ok(FilterExpression::Comparison {
                    field_name: def.field_name,
                    operator: def.operator,
                    reference_value: Segment::from_value(&def.reference_value),
                })
            }
            COMPOUND_TYPE => {
                let def: CompoundDefinition = serde_json::from_value(definition.clone())?;
                let left = Box::new(Self::compile(&def.left)?);
                let right = Box::new(Self::compile(&def.right)?);
                Ok(match def.operator {
                    BinaryOperator::And => FilterExpression::And(left, right),
                    BinaryOperator::Or => FilterExpression::Or(left, right),
                })
            }
            other => Err(StepError::ExecutionGraphError(format!(
                "Detected filter definition of type {} which is unknown",
                other
            ))),
        }
    }

    pub fn matches(&self, detection: &Detection) -> StepResult<bool> {
        match self {
            FilterExpression::Comparison {
                field_name,
                operator,
                reference_value,
            } => {
                let value = detection.field(field_name).ok_or_else(|| {
                    StepError::ConfigError(format!("unknown detection field: {}", field_name))
                })?;
                compare(*operator, &Segment::from_value(&value), reference_value)
            }
            FilterExpression::And(left, right) => {
                Ok(left.matches(detection)? && right.matches(detection)?)
            }
            FilterExpression::Or(left, right) => {
                Ok(left.matches(detection)? || right.matches(detection)?)
            }
        }
    }
}
