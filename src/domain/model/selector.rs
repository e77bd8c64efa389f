use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Prefix of selectors pointing at a runtime input.
pub const INPUTS_PREFIX: &str = "$inputs";
/// Prefix of selectors pointing at a step or one of its output fields.
pub const STEPS_PREFIX: &str = "$steps";
/// Field name selecting the whole output record of a step.
pub const WILDCARD_FIELD: &str = "*";

/// A reference to a runtime input or to (a field of) a step's output.
///
/// Textual forms: `$inputs.<name>`, `$steps.<step>` and
/// `$steps.<step>.<field>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Input { name: String },
    Step { step: String, field: Option<String> },
}

impl Selector {
    pub fn input(name: impl Into<String>) -> Self {
        Selector::Input { name: name.into() }
    }

    pub fn step(step: impl Into<String>) -> Self {
        Selector::Step {
            step: step.into(),
            field: None,
        }
    }

    pub fn step_output(step: impl Into<String>, field: impl Into<String>) -> Self {
        Selector::Step {
            step: step.into(),
            field: Some(field.into()),
        }
    }

    /// Whether `value` looks like a selector (a string starting with `$`).
    pub fn is_selector_like(value: &str) -> bool {
        value.starts_with('$')
    }

    pub fn parse_value(value: &Value) -> Option<Self> {
        value.as_str().and_then(Self::parse_str)
    }

    pub fn parse_str(selector: &str) -> Option<Self> {
        let mut parts = selector.split('.');
        let prefix = parts.next()?;
        let rest: Vec<&str> = parts.collect();
        if rest.iter().any(|p| p.is_empty()) {
            return None;
        }
        match (prefix, rest.as_slice()) {
            (INPUTS_PREFIX, [name]) => Some(Self::input(*name)),
            (STEPS_PREFIX, [step]) => Some(Self::step(*step)),
            (STEPS_PREFIX, [step, field]) => Some(Self::step_output(*step, *field)),
            _ => None,
        }
    }

    /// Name of the step this selector depends on, if any.
    pub fn step_name(&self) -> Option<&str> {
        match self {
            Selector::Step { step, .. } => Some(step),
            Selector::Input { .. } => None,
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Selector::Step { field, .. } => field.as_deref(),
            Selector::Input { .. } => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.field() == Some(WILDCARD_FIELD)
    }

    /// Sibling selector pointing at `field` of the same step.
    ///
    /// Input selectors have no siblings and yield `None`.
    pub fn with_field(&self, field: impl Into<String>) -> Option<Self> {
        match self {
            Selector::Step { step, .. } => Some(Self::step_output(step.clone(), field)),
            Selector::Input { .. } => None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Input { name } => write!(f, "{}.{}", INPUTS_PREFIX, name),
            Selector::Step { step, field: None } => write!(f, "{}.{}", STEPS_PREFIX, step),
            Selector::Step {
                step,
                field: Some(field),
            } => write!(f, "{}.{}.{}", STEPS_PREFIX, step, field),
        }
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SelectorVisitor;

        impl<'de> serde::de::Visitor<'de> for SelectorVisitor {
            type Value = Selector;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("selector string like '$inputs.name' or '$steps.step.field'")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Selector::parse_str(v)
                    .ok_or_else(|| E::custom(format!("invalid selector string: {}", v)))
            }
        }

        deserializer.deserialize_str(SelectorVisitor)
    }
}

/// A step field value: either a selector or a literal passed through as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamRef {
    Selector(Selector),
    Literal(Value),
}

impl ParamRef {
    pub fn literal(value: impl Into<Value>) -> Self {
        ParamRef::Literal(value.into())
    }

    /// Strings starting with `$` must parse as selectors.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match &value {
            Value::String(s) if Selector::is_selector_like(s) => Selector::parse_str(s)
                .map(ParamRef::Selector)
                .ok_or_else(|| format!("invalid selector string: {}", s)),
            _ => Ok(ParamRef::Literal(value)),
        }
    }

    pub fn as_selector(&self) -> Option<&Selector> {
        match self {
            ParamRef::Selector(selector) => Some(selector),
            ParamRef::Literal(_) => None,
        }
    }

    #[cfg(test)]
    pub fn is_null(&self) -> bool {
        matches!(self, ParamRef::Literal(Value::Null))
    }
}

impl Default for ParamRef {
    fn default() -> Self {
        ParamRef::Literal(Value::Null)
    }
}

impl From<Selector> for ParamRef {
    fn from(selector: Selector) -> Self {
        ParamRef::Selector(selector)
    }
}

impl Serialize for ParamRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ParamRef::Selector(selector) => selector.serialize(serializer),
            ParamRef::Literal(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ParamRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        ParamRef::from_value(value).map_err(serde::de::Error::custom)
    }
}
