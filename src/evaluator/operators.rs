use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::segment::Segment;
use crate::error::StepError;

/// Comparison operators shared by Condition steps and detection filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Operator {
    Equal,
    NotEqual,
    LowerThan,
    GreaterThan,
    LowerOrEqualThan,
    GreaterOrEqualThan,
    In,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "equal",
            Operator::NotEqual => "not_equal",
            Operator::LowerThan => "lower_than",
            Operator::GreaterThan => "greater_than",
            Operator::LowerOrEqualThan => "lower_or_equal_than",
            Operator::GreaterOrEqualThan => "greater_or_equal_than",
            Operator::In => "in",
        }
    }
}

impl FromStr for Operator {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equal" | "==" | "=" => Ok(Operator::Equal),
            "not_equal" | "!=" | "≠" => Ok(Operator::NotEqual),
            "lower_than" | "<" => Ok(Operator::LowerThan),
            "greater_than" | ">" => Ok(Operator::GreaterThan),
            "lower_or_equal_than" | "<=" | "≤" => Ok(Operator::LowerOrEqualThan),
            "greater_or_equal_than" | ">=" | "≥" => Ok(Operator::GreaterOrEqualThan),
            "in" => Ok(Operator::In),
            other => Err(StepError::ConfigError(format!("unknown operator: {}", other))),
        }
    }
}

impl TryFrom<String> for Operator {
    type Error = StepError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluates `left <op> right`.
pub fn compare(op: Operator, left: &Segment, right: &Segment) -> Result<bool, StepError> {
    match op {
        Operator::Equal => Ok(equal(left, right)),
        Operator::NotEqual => Ok(!equal(left, right)),
        Operator::LowerThan => order(op, left, right).map(|o| o == Ordering::Less),
        Operator::GreaterThan => order(op, left, right).map(|o| o == Ordering::Greater),
        Operator::LowerOrEqualThan => order(op, left, right).map(|o| o != Ordering::Greater),
        Operator::GreaterOrEqualThan => order(op, left, right).map(|o| o != Ordering::Less),
        Operator::In => contains(right, left),
    }
}

/// Equality with integers and floats compared by value.
pub fn equal(left: &Segment, right: &Segment) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

fn order(op: Operator, left: &Segment, right: &Segment) -> Result<Ordering, StepError> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a.partial_cmp(&b).ok_or_else(|| incomparable(op, left, right));
    }
    match (left, right) {
        (Segment::String(a), Segment::String(b)) => Ok(a.cmp(b)),
        (Segment::Boolean(a), Segment::Boolean(b)) => Ok(a.cmp(b)),
        _ => Err(incomparable(op, left, right)),
    }
}

fn contains(container: &Segment, item: &Segment) -> Result<bool, StepError> {
    match container {
        Segment::Array(items) | Segment::Batch(items) => Ok(items.iter().any(|i| equal(i, item))),
        Segment::String(haystack) => match item {
            Segment::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(incomparable(Operator::In, other, container)),
        },
        Segment::Object(map) => match item {
            Segment::String(key) => Ok(map.contains_key(key)),
            other => Err(incomparable(Operator::In, other, container)),
        },
        _ => Err(incomparable(Operator::In, item, container)),
    }
}

fn incomparable(op: Operator, left: &Segment, right: &Segment) -> StepError {
    StepError::TypeError(format!(
        "cannot evaluate {} {} {}",
        left.type_name(),
        op,
        right.type_name()
    ))
}
