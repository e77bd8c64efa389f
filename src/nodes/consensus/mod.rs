//! Detections consensus: cross-source IOU matching, voting and merging.

pub mod executor;
pub mod merge;
pub mod voting;

pub use executor::DetectionsConsensusExecutor;
pub use merge::{merge_detections, AggregationMode};
pub use voting::{
    check_presence, resolve_batch_consensus, ConsensusOutcome, ConsensusParams, RequiredObjects,
    ANY_OBJECT,
};
