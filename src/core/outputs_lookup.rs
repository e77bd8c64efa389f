//! Write-once table of completed steps' outputs for one run.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::segment::{BatchShape, Segment};
use crate::error::{WorkflowError, WorkflowResult};

/// Output record of one step for one image: field name to value.
pub type OutputMap = HashMap<String, Segment>;

/// What a step produced: one record, or one record per batch element.
pub type StepOutput = BatchShape<OutputMap>;

/// Maps step name to that step's output.
///
/// Each key is written at most once. Entries are stored behind `Arc` and
/// inserted under the write lock, so readers see either nothing or the
/// complete record.
#[derive(Debug, Default)]
pub struct OutputsLookup {
    entries: RwLock<HashMap<String, Arc<StepOutput>>>,
}

impl OutputsLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, step: &str, output: StepOutput) -> WorkflowResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(step) {
            return Err(WorkflowError::OutputAlreadyWritten(step.to_string()));
        }
        entries.insert(step.to_string(), Arc::new(output));
        Ok(())
    }

    pub fn get(&self, step: &str) -> Option<Arc<StepOutput>> {
        self.entries.read().get(step).cloned()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.entries.read().contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[cfg(test)]
    /// Names of the steps that have committed output so far.
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn snapshot(&self) -> HashMap<String, Arc<StepOutput>> {
        self.entries.read().clone()
    }
}
