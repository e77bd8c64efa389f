use std::collections::HashMap;

use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

/// Why one step depends on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The target reads the source's outputs through a selector.
    Data,
    /// The source is a flow-control step that may route to the target.
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeTraversalState {
    Pending,
    Taken,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub name: String,
    pub step_type: String,
    pub state: StepState,
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub kind: EdgeKind,
    pub state: EdgeTraversalState,
}

/// Step name to petgraph index.
pub type NodeIndexMap = HashMap<String, NodeIndex>;

/// Dependency graph of one workflow run, with per-run traversal state.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) graph: StableDiGraph<GraphNode, GraphEdge>,
    pub(crate) node_index_map: NodeIndexMap,
}

impl Graph {
    pub fn step_count(&self) -> usize {
        self.node_index_map.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node_index_map.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        let idx = self.node_index_map.get(name)?;
        self.graph.node_weight(*idx)
    }

    pub fn node_state(&self, name: &str) -> Option<StepState> {
        self.node(name).map(|n| n.state)
    }

    pub fn set_node_state(&mut self, name: &str, state: StepState) {
        if let Some(idx) = self.node_index_map.get(name) {
            if let Some(node) = self.graph.node_weight_mut(*idx) {
                node.state = state;
            }
        }
    }

    /// Steps without incoming edges, in insertion order.
    pub fn root_node_ids(&self) -> Vec<String> {
        self.graph
            .node_indices()
            .filter(|idx| {
                self.graph
                    .edges_directed(*idx, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .filter_map(|idx| self.graph.node_weight(idx).map(|n| n.name.clone()))
            .collect()
    }

    pub fn downstream_node_ids<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let mut seen = Vec::new();
        if let Some(idx) = self.node_index_map.get(name) {
            for target in self.graph.neighbors_directed(*idx, Direction::Outgoing) {
                if !seen.contains(&target) {
                    seen.push(target);
                }
            }
        }
        seen.into_iter()
            .filter_map(move |idx| self.graph.node_weight(idx).map(|n| n.name.as_str()))
    }

    #[cfg(test)]
    pub fn upstream_node_ids(&self, name: &str, kind: EdgeKind) -> Vec<String> {
        let Some(idx) = self.node_index_map.get(name) else {
            return Vec::new();
        };
        self.graph
            .edges_directed(*idx, Direction::Incoming)
            .filter(|e| e.weight().kind == kind)
            .filter_map(|e| self.graph.node_weight(e.source()).map(|n| n.name.clone()))
            .collect()
    }

    /// Whether `target` is one of the steps `source` may route to.
    pub fn has_control_target(&self, source: &str, target: &str) -> bool {
        let (Some(s), Some(t)) = (self.node_index_map.get(source), self.node_index_map.get(target))
        else {
            return false;
        };
        self.graph
            .edges_connecting(*s, *t)
            .any(|e| e.weight().kind == EdgeKind::Control)
    }

    pub fn has_control_edges(&self, name: &str) -> bool {
        self.node_index_map.get(name).is_some_and(|idx| {
            self.graph
                .edges_directed(*idx, Direction::Outgoing)
                .any(|e| e.weight().kind == EdgeKind::Control)
        })
    }

    /// Marks every outgoing edge taken.
    pub fn process_normal_edges(&mut self, name: &str) {
        self.set_outgoing(name, |_, _| EdgeTraversalState::Taken);
    }

    /// Takes the control edge to `selected`, skips the other control edges.
    /// Data edges out of the step are taken.
    pub fn process_branch_edges(&mut self, name: &str, selected: &str) {
        let selected_idx = self.node_index_map.get(selected).copied();
        self.set_outgoing(name, |edge, target| match edge.kind {
            EdgeKind::Control if Some(target) == selected_idx => EdgeTraversalState::Taken,
            EdgeKind::Control => EdgeTraversalState::Skipped,
            EdgeKind::Data => EdgeTraversalState::Taken,
        });
    }

    /// Marks every outgoing edge skipped.
    pub fn skip_outgoing_edges(&mut self, name: &str) {
        self.set_outgoing(name, |_, _| EdgeTraversalState::Skipped);
    }

    fn set_outgoing(
        &mut self,
        name: &str,
        decide: impl Fn(&GraphEdge, NodeIndex) -> EdgeTraversalState,
    ) {
        let Some(idx) = self.node_index_map.get(name).copied() else {
            return;
        };
        let edges: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.id(), e.target()))
            .collect();
        for (edge_id, target) in edges {
            if let Some(edge) = self.graph.edge_weight_mut(edge_id) {
                edge.state = decide(edge, target);
            }
        }
    }

    /// A pending step whose incoming edges are all resolved.
    pub fn is_node_ready(&self, name: &str) -> bool {
        let Some(idx) = self.node_index_map.get(name) else {
            return false;
        };
        let pending = self
            .graph
            .node_weight(*idx)
            .is_some_and(|n| n.state == StepState::Pending);
        pending
            && self
                .graph
                .edges_directed(*idx, Direction::Incoming)
                .all(|e| e.weight().state != EdgeTraversalState::Pending)
    }

    /// A ready step must be skipped when any data dependency was skipped, or
    /// when it is a branch target and no branch routed to it.
    pub fn should_skip(&self, name: &str) -> bool {
        let Some(idx) = self.node_index_map.get(name) else {
            return false;
        };
        let mut has_control = false;
        let mut control_taken = false;
        for edge in self.graph.edges_directed(*idx, Direction::Incoming) {
            let weight = edge.weight();
            match weight.kind {
                EdgeKind::Data if weight.state == EdgeTraversalState::Skipped => return true,
                EdgeKind::Data => {}
                EdgeKind::Control => {
                    has_control = true;
                    control_taken |= weight.state == EdgeTraversalState::Taken;
                }
            }
        }
        has_control && !control_taken
    }

    pub fn pending_steps(&self) -> Vec<String> {
        self.graph
            .node_weights()
            .filter(|n| n.state == StepState::Pending)
            .map(|n| n.name.clone())
            .collect()
    }
}
