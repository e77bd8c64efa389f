//! # VisionFlow: a computer-vision workflow engine
//!
//! `visionflow` executes declarative workflows of computer-vision steps
//! (model inference, cropping, filtering, offsetting, multi-model
//! consensus, conditional branching) against single images or image
//! batches. It provides:
//!
//! - **Selector resolution**: step fields reference runtime inputs
//!   (`$inputs.image`) or earlier step outputs (`$steps.detect.predictions`).
//! - **Graph execution**: steps run as soon as their dependencies have
//!   committed outputs, with bounded concurrency.
//! - **Flow control**: `Condition` steps pick a successor and untaken
//!   branches are pruned.
//! - **Detections consensus**: IOU-based voting across several detection
//!   sources with configurable aggregation.
//! - **Provenance**: every derived image and detection records the id of
//!   what it was derived from.
//!
//! Model inference is delegated to a caller-supplied [`ModelProvider`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use visionflow::{parse_dsl, DslFormat, Segment, WorkflowImage, WorkflowRunner};
//!
//! #[tokio::main]
//! async fn main() {
//!     let yaml = std::fs::read_to_string("workflow.yaml").unwrap();
//!     let spec = parse_dsl(&yaml, DslFormat::Yaml).unwrap();
//!     let bytes = std::fs::read("frame.jpg").unwrap();
//!     let outputs = WorkflowRunner::builder(spec)
//!         .input("image", Segment::Image(WorkflowImage::from_bytes("", bytes)))
//!         .model_provider(Arc::new(visionflow::inference::UnavailableModelProvider))
//!         .run()
//!         .await
//!         .unwrap();
//!     println!("{:?}", outputs);
//! }
//! ```

pub mod api;
pub mod core;
pub mod domain;
pub mod dsl;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod inference;
pub mod nodes;

pub use crate::api::{WorkflowRunner, WorkflowRunnerBuilder};
pub use crate::core::{
    BatchShape, EngineConfig, FakeIdGenerator, GraphEngineEvent, IdGenerator, OutputsLookup,
    RealIdGenerator, RuntimeContext, Segment, VariablePool, WorkflowDispatcher,
};
pub use crate::domain::model::{BoundingBox, Detection, Selector, WorkflowImage};
pub use crate::dsl::{parse_dsl, DslFormat, WorkflowSpecification};
pub use crate::error::{StepError, WorkflowError};
pub use crate::graph::{build_graph, Graph};
pub use crate::inference::ModelProvider;
pub use crate::nodes::{StepExecutor, StepExecutorRegistry};
