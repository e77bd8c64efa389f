//! Step dependency graph.
//!
//! The [`Graph`] is built from a [`WorkflowSpecification`](crate::dsl::WorkflowSpecification)
//! by [`build_graph`]. It carries the traversal state the
//! [`WorkflowDispatcher`](crate::core::WorkflowDispatcher) uses to decide
//! which steps are ready, which run and which are pruned.

pub mod builder;
pub mod types;

pub use builder::*;
pub use types::*;
