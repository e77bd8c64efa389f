//! High-level workflow runner and builder.
//!
//! [`WorkflowRunner`] (constructed via [`WorkflowRunnerBuilder`]) is the main
//! entry point for executing a parsed workflow specification. It validates
//! the runtime inputs, builds the step graph and drives a
//! [`WorkflowDispatcher`] to completion.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::dispatcher::{EngineConfig, EventEmitter, WorkflowDispatcher};
use crate::core::event_bus::GraphEngineEvent;
use crate::core::image_decoder::ImageDecoder;
use crate::core::outputs_lookup::OutputsLookup;
use crate::core::runtime_context::{IdGenerator, RuntimeContext};
use crate::core::segment::Segment;
use crate::core::variable_pool::{RuntimeParameters, VariablePool};
use crate::domain::model::INPUTS_PREFIX;
use crate::dsl::schema::{InputDefinition, WorkflowSpecification};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::build_graph;
use crate::inference::ModelProvider;
use crate::nodes::StepExecutorRegistry;

/// Workflow runner with builder-based configuration.
///
/// Use [`WorkflowRunner::builder(spec)`](Self::builder) to obtain a
/// [`WorkflowRunnerBuilder`].
pub struct WorkflowRunner;

impl WorkflowRunner {
    /// Create a new builder from a parsed workflow specification.
    pub fn builder(spec: WorkflowSpecification) -> WorkflowRunnerBuilder {
        WorkflowRunnerBuilder {
            spec,
            inputs: HashMap::new(),
            config: EngineConfig::default(),
            context: RuntimeContext::default(),
            registry: None,
            event_tx: None,
        }
    }
}

/// Builder for configuring and launching a workflow run.
pub struct WorkflowRunnerBuilder {
    spec: WorkflowSpecification,
    inputs: HashMap<String, Segment>,
    config: EngineConfig,
    context: RuntimeContext,
    registry: Option<Arc<StepExecutorRegistry>>,
    event_tx: Option<mpsc::Sender<GraphEngineEvent>>,
}

impl WorkflowRunnerBuilder {
    /// Runtime inputs as JSON values. Arrays of arrays of detection objects
    /// become batches.
    pub fn user_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.inputs.extend(
            inputs
                .iter()
                .map(|(name, value)| (name.clone(), Segment::from_value(value))),
        );
        self
    }

    pub fn input(mut self, name: impl Into<String>, value: Segment) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        self.context = self.context.with_model_provider(provider);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.context = self.context.with_api_key(api_key);
        self
    }

    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.context = self.context.with_id_generator(id_generator);
        self
    }

    pub fn image_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.context = self.context.with_image_decoder(decoder);
        self
    }

    /// Replace the built-in step executors.
    pub fn registry(mut self, registry: Arc<StepExecutorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Receive [`GraphEngineEvent`]s for this run.
    pub fn events(mut self, tx: mpsc::Sender<GraphEngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the workflow to completion. Returns one output map per element of
    /// the image batch.
    pub async fn run(self) -> WorkflowResult<Vec<HashMap<String, Value>>> {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(StepExecutorRegistry::new()));
        let graph = build_graph(&self.spec, &registry)?;
        let runtime = runtime_parameters(&self.spec, self.inputs)?;

        let event_emitter = match self.event_tx {
            Some(tx) => EventEmitter::new(tx, Arc::new(AtomicBool::new(true))),
            None => EventEmitter::inactive(),
        };

        tracing::debug!(
            steps = self.spec.steps.len(),
            inputs = runtime.len(),
            "starting workflow run"
        );

        let pool = VariablePool::new(Arc::new(runtime), Arc::new(OutputsLookup::new()));
        let mut dispatcher = WorkflowDispatcher::new(
            graph,
            Arc::new(self.spec),
            registry,
            pool,
            event_emitter,
            self.config,
            Arc::new(self.context),
        );
        dispatcher.run().await
    }
}

/// Keeps the declared inputs only, applies defaults and gives images a
/// parent id.
fn runtime_parameters(
    spec: &WorkflowSpecification,
    mut supplied: HashMap<String, Segment>,
) -> WorkflowResult<RuntimeParameters> {
    let mut runtime = RuntimeParameters::new();
    for input in &spec.inputs {
        let name = input.name();
        let value = match (supplied.remove(name), input) {
            (Some(value), InputDefinition::InferenceImage { .. }) => image_input(name, value)?,
            (Some(value), _) => value,
            (None, InputDefinition::InferenceParameter { default_value: Some(default), .. }) => {
                Segment::from_value(default)
            }
            (None, _) => continue,
        };
        runtime.insert(name, value);
    }
    for name in supplied.keys() {
        tracing::warn!(input = %name, "dropping undeclared runtime input");
    }
    Ok(runtime)
}

fn image_input(name: &str, value: Segment) -> WorkflowResult<Segment> {
    let default_parent = format!("{}.{}", INPUTS_PREFIX, name);
    let with_parent = |segment: Segment| match segment {
        Segment::Image(mut image) => {
            if image.parent_id.is_empty() {
                image.parent_id = default_parent.clone();
            }
            Ok(Segment::Image(image))
        }
        other => Err(WorkflowError::GraphValidationError(format!(
            "Input '{}' must be an image, got {}",
            name,
            other.type_name()
        ))),
    };
    match value {
        Segment::Batch(items) | Segment::Array(items) => Ok(Segment::Batch(
            items
                .into_iter()
                .map(with_parent)
                .collect::<WorkflowResult<_>>()?,
        )),
        single => with_parent(single),
    }
}
