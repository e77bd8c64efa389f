use std::collections::HashSet;

use petgraph::stable_graph::StableDiGraph;
use serde_json::Value;

use crate::domain::model::Selector;
use crate::dsl::WorkflowSpecification;
use crate::error::WorkflowError;
use crate::nodes::StepExecutorRegistry;

use super::types::*;

/// Builds the dependency graph of `spec`.
///
/// Data edges come from every `$steps` selector found in a step's fields;
/// control edges from the fields its executor declares as flow control.
pub fn build_graph(
    spec: &WorkflowSpecification,
    registry: &StepExecutorRegistry,
) -> Result<Graph, WorkflowError> {
    let mut graph = StableDiGraph::<GraphNode, GraphEdge>::new();
    let mut node_index_map = NodeIndexMap::new();

    // 1. Add all steps
    for step in &spec.steps {
        if node_index_map.contains_key(&step.name) {
            return Err(WorkflowError::GraphBuildError(format!(
                "Duplicate step name: {}",
                step.name
            )));
        }
        if !registry.contains(&step.step_type) {
            return Err(WorkflowError::ExecutorNotFound(step.step_type.clone()));
        }
        let idx = graph.add_node(GraphNode {
            name: step.name.clone(),
            step_type: step.step_type.clone(),
            state: StepState::Pending,
        });
        node_index_map.insert(step.name.clone(), idx);
    }

    // 2. Collect dependency edges
    let mut edges: HashSet<(String, String, EdgeKind)> = HashSet::new();
    let mut ordered_edges = Vec::new();
    for step in &spec.steps {
        let flow_fields = registry
            .get(&step.step_type)
            .map(|executor| executor.flow_control_fields())
            .unwrap_or(&[]);

        let mut field_names: Vec<&String> = step.fields.keys().collect();
        field_names.sort();
        for field in field_names {
            let value = &step.fields[field];
            if flow_fields.contains(&field.as_str()) {
                let target = control_target(&step.name, field, value)?;
                ordered_edges.push((step.name.clone(), target, EdgeKind::Control));
                continue;
            }
            if let Value::String(s) = value {
                if Selector::is_selector_like(s) && Selector::parse_str(s).is_none() {
                    return Err(WorkflowError::GraphBuildError(format!(
                        "Invalid selector '{}' in field '{}' of step '{}'",
                        s, field, step.name
                    )));
                }
            }
            let mut found = Vec::new();
            collect_selectors(value, &mut found);
            for selector in found {
                if let Some(source) = selector.step_name() {
                    ordered_edges.push((source.to_string(), step.name.clone(), EdgeKind::Data));
                }
            }
        }
    }

    for (source, target, kind) in ordered_edges {
        if !edges.insert((source.clone(), target.clone(), kind)) {
            continue;
        }
        let source_idx = node_index_map.get(&source).ok_or_else(|| {
            WorkflowError::GraphBuildError(format!(
                "Step '{}' references unknown step: {}",
                target, source
            ))
        })?;
        let target_idx = node_index_map.get(&target).ok_or_else(|| {
            WorkflowError::GraphBuildError(format!(
                "Step '{}' routes to unknown step: {}",
                source, target
            ))
        })?;
        graph.add_edge(
            *source_idx,
            *target_idx,
            GraphEdge {
                kind,
                state: EdgeTraversalState::Pending,
            },
        );
    }

    // 3. The dependency graph must be acyclic
    if petgraph::algo::toposort(&graph, None).is_err() {
        return Err(WorkflowError::CycleDetected);
    }

    // 4. Output selectors must point at known steps
    for output in &spec.outputs {
        if let Some(step) = output.selector().step_name() {
            if !node_index_map.contains_key(step) {
                return Err(WorkflowError::GraphBuildError(format!(
                    "Output '{}' references unknown step: {}",
                    output.name(),
                    step
                )));
            }
        }
    }

    Ok(Graph {
        graph,
        node_index_map,
    })
}

fn control_target(step: &str, field: &str, value: &Value) -> Result<String, WorkflowError> {
    let selector = value.as_str().and_then(Selector::parse_str);
    match selector {
        Some(Selector::Step {
            step: target,
            field: None,
        }) => Ok(target),
        _ => Err(WorkflowError::GraphBuildError(format!(
            "Field '{}' of step '{}' must name a step as '$steps.<name>', got {}",
            field, step, value
        ))),
    }
}

fn collect_selectors(value: &Value, out: &mut Vec<Selector>) {
    match value {
        Value::String(s) => {
            if let Some(selector) = Selector::parse_str(s) {
                out.push(selector);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_selectors(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_selectors(v, out)),
        _ => {}
    }
}
