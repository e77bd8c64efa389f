pub mod dispatcher;
pub mod event_bus;
pub mod image_decoder;
pub mod outputs_lookup;
pub mod runtime_context;
pub mod segment;
pub mod variable_pool;

pub use dispatcher::{EngineConfig, EventEmitter, WorkflowDispatcher};
pub use event_bus::GraphEngineEvent;
pub use image_decoder::{DecodedImage, DefaultImageDecoder, ImageDecoder};
pub use outputs_lookup::{OutputMap, OutputsLookup, StepOutput};
pub use runtime_context::{FakeIdGenerator, IdGenerator, RealIdGenerator, RuntimeContext};
pub use segment::{BatchShape, Segment};
pub use variable_pool::{RuntimeParameters, VariablePool};
