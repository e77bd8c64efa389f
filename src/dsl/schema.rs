use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::core::outputs_lookup::StepOutput;
use crate::domain::model::{ParamRef, Selector};
use crate::error::{StepError, StepResult};

// ================================
// Workflow Specification
// ================================

/// Current workflow definition version
pub const CURRENT_DSL_VERSION: &str = "1.0";

fn default_version() -> String {
    CURRENT_DSL_VERSION.to_string()
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowSpecification {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub outputs: Vec<OutputDefinition>,
}

impl WorkflowSpecification {
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&InputDefinition> {
        self.inputs.iter().find(|i| i.name() == name)
    }
}

/// A declared runtime input.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum InputDefinition {
    InferenceImage {
        name: String,
    },
    InferenceParameter {
        name: String,
        #[serde(default)]
        default_value: Option<Value>,
    },
}

impl InputDefinition {
    pub fn name(&self) -> &str {
        match self {
            InputDefinition::InferenceImage { name } => name,
            InputDefinition::InferenceParameter { name, .. } => name,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, InputDefinition::InferenceImage { .. })
    }
}

/// One step record. The `type` tag selects the executor; every other field
/// is kept as raw JSON and may hold a literal or a selector string.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StepDefinition {
    #[serde(rename = "type")]
    pub step_type: String,
    pub name: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl StepDefinition {
    pub fn new(step_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            name: name.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn raw(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// A field as literal-or-selector. Missing fields read as `null`.
    pub fn param(&self, field: &str) -> StepResult<ParamRef> {
        match self.fields.get(field) {
            None => Ok(ParamRef::default()),
            Some(value) => ParamRef::from_value(value.clone()).map_err(StepError::InvalidSelector),
        }
    }

    /// A field that must hold a selector.
    pub fn selector(&self, field: &str) -> StepResult<Selector> {
        match self.param(field)? {
            ParamRef::Selector(selector) => Ok(selector),
            ParamRef::Literal(value) => Err(StepError::ConfigError(format!(
                "step '{}': field '{}' must be a selector, got {}",
                self.name, field, value
            ))),
        }
    }
}

/// A declared run output.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum OutputDefinition {
    JsonField { name: String, selector: Selector },
}

impl OutputDefinition {
    pub fn name(&self) -> &str {
        match self {
            OutputDefinition::JsonField { name, .. } => name,
        }
    }

    pub fn selector(&self) -> &Selector {
        match self {
            OutputDefinition::JsonField { selector, .. } => selector,
        }
    }
}

// ================================
// Step Run Result
// ================================

/// What an executor hands back to the runner.
#[derive(Debug, Clone, Default)]
pub struct StepRunResult {
    /// Explicit successor chosen by a flow-control step. `None` follows the
    /// declared graph.
    pub next_step: Option<Selector>,
    /// Outputs to commit under the step's name. Flow-control steps have none.
    pub outputs: Option<StepOutput>,
}

impl StepRunResult {
    pub fn with_outputs(outputs: StepOutput) -> Self {
        Self {
            next_step: None,
            outputs: Some(outputs),
        }
    }

    pub fn branch(next_step: Selector) -> Self {
        Self {
            next_step: Some(next_step),
            outputs: None,
        }
    }
}
