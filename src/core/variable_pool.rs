//! Selector resolution over runtime parameters and the outputs lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::outputs_lookup::{OutputMap, OutputsLookup, StepOutput};
use super::segment::{BatchShape, Segment};
use crate::domain::model::{ParamRef, Selector, WILDCARD_FIELD};
use crate::error::{StepError, StepResult};

/// Runtime inputs of one run. Immutable once the run has started.
#[derive(Debug, Clone, Default)]
pub struct RuntimeParameters {
    values: HashMap<String, Segment>,
}

impl RuntimeParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Segment) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Segment> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Segment)> {
        self.values.iter()
    }
}

impl FromIterator<(String, Segment)> for RuntimeParameters {
    fn from_iter<I: IntoIterator<Item = (String, Segment)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Read-side view handed to step executors.
///
/// Cloning is cheap; both tables are shared. Selectors are resolved lazily
/// each time a step asks, nothing is cached outside the outputs lookup.
#[derive(Debug, Clone)]
pub struct VariablePool {
    runtime: Arc<RuntimeParameters>,
    outputs: Arc<OutputsLookup>,
}

impl VariablePool {
    pub fn new(runtime: Arc<RuntimeParameters>, outputs: Arc<OutputsLookup>) -> Self {
        Self { runtime, outputs }
    }

    pub fn runtime_parameters(&self) -> &RuntimeParameters {
        &self.runtime
    }

    pub fn outputs(&self) -> &Arc<OutputsLookup> {
        &self.outputs
    }

    /// Resolves a step field: literals pass through, selectors are looked up.
    pub fn resolve(&self, param: &ParamRef) -> StepResult<Segment> {
        match param {
            ParamRef::Literal(value) => Ok(Segment::from_value(value)),
            ParamRef::Selector(selector) => self.resolve_selector(selector),
        }
    }

    pub fn resolve_selector(&self, selector: &Selector) -> StepResult<Segment> {
        match selector {
            Selector::Input { name } => self
                .runtime
                .get(name)
                .cloned()
                .ok_or_else(|| StepError::UnknownInput(name.clone())),
            Selector::Step { step, field } => {
                let output = self
                    .outputs
                    .get(step)
                    .ok_or_else(|| StepError::UnresolvedReference(step.clone()))?;
                match field.as_deref() {
                    None | Some(WILDCARD_FIELD) => Ok(whole_record(&output)),
                    Some(field) => field_of(step, field, &output),
                }
            }
        }
    }

    /// Resolves `field` of the step that `param` points at, e.g. the image a
    /// set of predictions was produced against.
    ///
    /// Returns `None` for literals and input selectors. A step that does not
    /// publish `field` is an error like any other unresolved reference.
    pub fn resolve_sibling(&self, param: &ParamRef, field: &str) -> StepResult<Option<Segment>> {
        let Some(sibling) = param.as_selector().and_then(|s| s.with_field(field)) else {
            return Ok(None);
        };
        self.resolve_selector(&sibling).map(Some)
    }
}

fn field_of(step: &str, field: &str, output: &StepOutput) -> StepResult<Segment> {
    let lookup = |record: &OutputMap| {
        record
            .get(field)
            .cloned()
            .ok_or_else(|| StepError::UnknownField {
                step: step.to_string(),
                field: field.to_string(),
            })
    };
    match output {
        BatchShape::Single(record) => lookup(record),
        BatchShape::Batch(records) => records
            .iter()
            .map(lookup)
            .collect::<StepResult<Vec<_>>>()
            .map(Segment::Batch),
    }
}

fn whole_record(output: &StepOutput) -> Segment {
    let to_object = |record: &OutputMap| {
        Segment::Object(
            record
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        )
    };
    match output {
        BatchShape::Single(record) => to_object(record),
        BatchShape::Batch(records) => Segment::Batch(records.iter().map(to_object).collect()),
    }
}
