pub mod consensus;
pub mod control_flow;
pub mod crop;
pub mod detection_transform;
pub mod executor;
pub mod models;
pub mod registry;
pub mod utils;

pub use executor::*;
pub use registry::StepExecutorRegistry;
