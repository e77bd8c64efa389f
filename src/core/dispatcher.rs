//! Workflow dispatcher, the main execution driver.
//!
//! The [`WorkflowDispatcher`] walks the step graph, running every step whose
//! dependencies are resolved through its registered
//! [`StepExecutor`](crate::nodes::StepExecutor), committing outputs to the
//! outputs lookup, applying branch decisions and pruning untaken branches.

use serde_json::Value;

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::core::event_bus::GraphEngineEvent;
use crate::core::outputs_lookup::{OutputMap, OutputsLookup, StepOutput};
use crate::core::runtime_context::RuntimeContext;
use crate::core::segment::{BatchShape, Segment};
use crate::core::variable_pool::VariablePool;
use crate::domain::model::{Selector, WILDCARD_FIELD};
use crate::dsl::schema::{StepDefinition, StepRunResult, WorkflowSpecification};
use crate::error::{StepError, WorkflowError, WorkflowResult};
use crate::graph::types::{Graph, StepState};
use crate::nodes::StepExecutorRegistry;

/// Sender wrapper for engine events, with an atomic active flag so that event
/// emission can be cheaply skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<GraphEngineEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<GraphEngineEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    /// An emitter nobody listens to.
    pub fn inactive() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self::new(tx, Arc::new(AtomicBool::new(false)))
    }

    #[inline(always)]
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    #[doc(hidden)]
    pub async fn emit(&self, event: GraphEngineEvent) {
        if self.is_active() {
            let _ = self.tx.send(event).await;
        }
    }
}

/// Configuration for the workflow engine
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_parallel_enabled")]
    pub parallel_enabled: bool,
    /// Upper bound on concurrently running steps, `0` for no bound.
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_parallel_enabled() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallel_enabled: true,
            max_concurrency: 0,
        }
    }
}

impl EngineConfig {
    pub fn effective_concurrency(&self) -> usize {
        if self.parallel_enabled {
            self.max_concurrency
        } else {
            1
        }
    }
}

struct StepOutcome {
    step: StepDefinition,
    result: Result<StepRunResult, StepError>,
}

/// The main workflow dispatcher: drives graph execution for one run.
pub struct WorkflowDispatcher {
    graph: Arc<RwLock<Graph>>,
    spec: Arc<WorkflowSpecification>,
    registry: Arc<StepExecutorRegistry>,
    pool: VariablePool,
    context: Arc<RuntimeContext>,
    config: EngineConfig,
    event_emitter: EventEmitter,
}

impl WorkflowDispatcher {
    pub fn new(
        graph: Graph,
        spec: Arc<WorkflowSpecification>,
        registry: Arc<StepExecutorRegistry>,
        pool: VariablePool,
        event_emitter: EventEmitter,
        config: EngineConfig,
        context: Arc<RuntimeContext>,
    ) -> Self {
        Self {
            graph: Arc::new(RwLock::new(graph)),
            spec,
            registry,
            pool,
            context,
            config,
            event_emitter,
        }
    }

    /// Outputs committed so far. Still readable after a failed run.
    pub fn outputs_lookup(&self) -> &Arc<OutputsLookup> {
        self.pool.outputs()
    }

    pub fn step_state(&self, step: &str) -> Option<StepState> {
        self.graph.read().node_state(step)
    }

    /// Number of elements in the run's image batch: the longest batched
    /// image input, `1` when every image input is a single image.
    pub fn batch_size(&self) -> usize {
        let runtime = self.pool.runtime_parameters();
        self.spec
            .inputs
            .iter()
            .filter(|input| input.is_image())
            .filter_map(|input| match runtime.get(input.name()) {
                Some(Segment::Batch(items)) | Some(Segment::Array(items)) => Some(items.len()),
                _ => None,
            })
            .max()
            .unwrap_or(1)
    }

    fn skip_step_and_collect_ready(&self, step: &str) -> Vec<String> {
        let mut g = self.graph.write();
        g.set_node_state(step, StepState::Skipped);
        g.skip_outgoing_edges(step);

        g.downstream_node_ids(step)
            .filter(|ds| g.is_node_ready(ds))
            .map(|ds| ds.to_string())
            .collect()
    }

    fn advance_graph_after_success(
        &self,
        step: &str,
        next_step: Option<&Selector>,
    ) -> WorkflowResult<Vec<String>> {
        let mut g = self.graph.write();

        g.set_node_state(step, StepState::Completed);

        match next_step {
            Some(selector) => {
                let target = selector.step_name().unwrap_or_default();
                if !g.has_control_target(step, target) {
                    return Err(WorkflowError::GraphValidationError(format!(
                        "Step {} selected '{}' which is not one of its branch targets",
                        step, selector
                    )));
                }
                g.process_branch_edges(step, target);
            }
            None if g.has_control_edges(step) => {
                return Err(WorkflowError::GraphValidationError(format!(
                    "Flow control step {} did not select a next step",
                    step
                )));
            }
            None => g.process_normal_edges(step),
        }

        Ok(g.downstream_node_ids(step)
            .filter(|ds| g.is_node_ready(ds))
            .map(|ds| ds.to_string())
            .collect())
    }

    async fn handle_step_success(
        &self,
        step: &StepDefinition,
        result: StepRunResult,
        advance: bool,
    ) -> WorkflowResult<Vec<String>> {
        let rendered = match (&result.outputs, self.event_emitter.is_active()) {
            (Some(outputs), true) => step_output_value(outputs),
            _ => Value::Null,
        };
        if let Some(outputs) = result.outputs {
            self.pool.outputs().insert(&step.name, outputs)?;
        }
        tracing::debug!(step = %step.name, step_type = %step.step_type, "step succeeded");
        self.event_emitter
            .emit(GraphEngineEvent::StepSucceeded {
                step: step.name.clone(),
                step_type: step.step_type.clone(),
                outputs: rendered,
            })
            .await;

        if !advance {
            return Ok(Vec::new());
        }
        if let Some(next) = &result.next_step {
            tracing::info!(step = %step.name, next_step = %next, "branch selected");
            self.event_emitter
                .emit(GraphEngineEvent::BranchSelected {
                    step: step.name.clone(),
                    next_step: next.step_name().unwrap_or_default().to_string(),
                })
                .await;
        }
        self.advance_graph_after_success(&step.name, result.next_step.as_ref())
    }

    async fn handle_step_failure(&self, step: StepDefinition, error: StepError) -> WorkflowError {
        let structural = error.is_structural();
        if structural {
            tracing::error!(step = %step.name, step_type = %step.step_type, error = %error, "step failed");
        } else {
            tracing::warn!(step = %step.name, step_type = %step.step_type, error = %error, "model call failed");
        }
        self.event_emitter
            .emit(GraphEngineEvent::StepFailed {
                step: step.name.clone(),
                step_type: step.step_type.clone(),
                error: error.to_string(),
                structural,
            })
            .await;
        WorkflowError::StepExecutionError {
            step: step.name,
            source: error,
        }
    }

    /// Executes the workflow and returns one output map per image of the
    /// batch.
    ///
    /// On the first failure nothing new is scheduled; steps already running
    /// finish and their outputs are committed, then the failure is returned.
    pub async fn run(&mut self) -> WorkflowResult<Vec<HashMap<String, Value>>> {
        self.event_emitter.emit(GraphEngineEvent::RunStarted).await;

        let mut ready: VecDeque<String> = self.graph.read().root_node_ids().into();
        let mut join_set: JoinSet<StepOutcome> = JoinSet::new();
        let mut failure: Option<WorkflowError> = None;
        let max_concurrency = self.config.effective_concurrency();

        loop {
            while failure.is_none()
                && (max_concurrency == 0 || join_set.len() < max_concurrency)
            {
                let Some(step_name) = ready.pop_front() else {
                    break;
                };

                let skip = self.graph.read().should_skip(&step_name);
                if skip {
                    tracing::debug!(step = %step_name, "step skipped");
                    self.event_emitter
                        .emit(GraphEngineEvent::StepSkipped {
                            step: step_name.clone(),
                        })
                        .await;
                    ready.extend(self.skip_step_and_collect_ready(&step_name));
                    continue;
                }

                let Some(step) = self.spec.step(&step_name).cloned() else {
                    failure = Some(WorkflowError::StepNotFound(step_name));
                    break;
                };
                let Some(executor) = self.registry.get(&step.step_type) else {
                    failure = Some(WorkflowError::ExecutorNotFound(step.step_type));
                    break;
                };

                self.graph.write().set_node_state(&step.name, StepState::Running);
                tracing::debug!(step = %step.name, step_type = %step.step_type, "dispatching step");
                self.event_emitter
                    .emit(GraphEngineEvent::StepStarted {
                        step: step.name.clone(),
                        step_type: step.step_type.clone(),
                    })
                    .await;

                let pool = self.pool.clone();
                let context = self.context.clone();
                join_set.spawn(async move {
                    let result = executor.execute(&step, &pool, &context).await;
                    StepOutcome { step, result }
                });
            }

            if join_set.is_empty() {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                continue;
            };

            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    failure.get_or_insert(WorkflowError::InternalError(format!(
                        "step task join error: {}",
                        join_error
                    )));
                    continue;
                }
            };

            match outcome.result {
                Ok(result) => {
                    let advance = failure.is_none();
                    match self.handle_step_success(&outcome.step, result, advance).await {
                        Ok(newly_ready) => ready.extend(newly_ready),
                        Err(e) => {
                            failure.get_or_insert(e);
                        }
                    }
                }
                Err(error) => {
                    let err = self.handle_step_failure(outcome.step, error).await;
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            self.event_emitter
                .emit(GraphEngineEvent::RunFailed {
                    error: err.to_string(),
                })
                .await;
            return Err(err);
        }

        let pending = self.graph.read().pending_steps();
        if !pending.is_empty() {
            let err = WorkflowError::InternalError(format!(
                "run finished with unscheduled steps: {}",
                pending.join(", ")
            ));
            self.event_emitter
                .emit(GraphEngineEvent::RunFailed {
                    error: err.to_string(),
                })
                .await;
            return Err(err);
        }

        let outputs = self.build_outputs()?;
        if self.event_emitter.is_active() {
            self.event_emitter
                .emit(GraphEngineEvent::RunSucceeded {
                    outputs: outputs
                        .iter()
                        .map(|o| Value::Object(o.clone().into_iter().collect()))
                        .collect(),
                })
                .await;
        }
        Ok(outputs)
    }

    /// Resolves every declared output once per image of the batch.
    ///
    /// Outputs of steps that were pruned read as `null`. A batched value
    /// with one entry per image is split across the results; anything else
    /// is reported whole in every result.
    pub fn build_outputs(&self) -> WorkflowResult<Vec<HashMap<String, Value>>> {
        let batch_size = self.batch_size();
        (0..batch_size)
            .map(|index| {
                self.spec
                    .outputs
                    .iter()
                    .map(|output| {
                        let value = self.output_value(output.name(), output.selector(), index, batch_size)?;
                        Ok((output.name().to_string(), value))
                    })
                    .collect()
            })
            .collect()
    }

    fn output_value(
        &self,
        name: &str,
        selector: &Selector,
        index: usize,
        batch_size: usize,
    ) -> WorkflowResult<Value> {
        let unknown_field = |step: &str, field: &str| {
            WorkflowError::GraphValidationError(format!(
                "Output '{}' references unknown field '{}' of step '{}'",
                name, field, step
            ))
        };
        match selector {
            Selector::Input { name: input } => {
                Ok(match self.pool.runtime_parameters().get(input) {
                    Some(Segment::Batch(items)) if items.len() == batch_size => {
                        items.get(index).map(Segment::to_value).unwrap_or_default()
                    }
                    Some(value) => value.to_value(),
                    None => Value::Null,
                })
            }
            Selector::Step { step, field } => {
                let Some(output) = self.pool.outputs().get(step) else {
                    return Ok(Value::Null);
                };
                let record = match output.as_ref() {
                    BatchShape::Batch(records) if records.len() == batch_size => records.get(index),
                    _ => None,
                };
                match record {
                    Some(record) => record_value(record, field.as_deref())
                        .ok_or_else(|| unknown_field(step, field.as_deref().unwrap_or_default())),
                    None => self
                        .pool
                        .resolve_selector(selector)
                        .map(|segment| segment.to_value())
                        .map_err(|e| match e {
                            StepError::UnknownField { step, field } => unknown_field(&step, &field),
                            other => WorkflowError::InternalError(other.to_string()),
                        }),
                }
            }
        }
    }
}

fn record_value(record: &OutputMap, field: Option<&str>) -> Option<Value> {
    match field {
        None | Some(WILDCARD_FIELD) => Some(record_to_value(record)),
        Some(field) => record.get(field).map(Segment::to_value),
    }
}

fn record_to_value(record: &OutputMap) -> Value {
    Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect(),
    )
}

/// JSON rendering of a step output for events.
pub fn step_output_value(output: &StepOutput) -> Value {
    match output {
        BatchShape::Single(record) => record_to_value(record),
        BatchShape::Batch(records) => Value::Array(records.iter().map(record_to_value).collect()),
    }
}
