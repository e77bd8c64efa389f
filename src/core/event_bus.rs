use serde::Serialize;
use serde_json::Value;

/// Events emitted while a workflow runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    RunStarted,
    StepStarted {
        step: String,
        step_type: String,
    },
    StepSucceeded {
        step: String,
        step_type: String,
        outputs: Value,
    },
    StepSkipped {
        step: String,
    },
    BranchSelected {
        step: String,
        next_step: String,
    },
    StepFailed {
        step: String,
        step_type: String,
        error: String,
        /// `false` when the failure came from the model provider.
        structural: bool,
    },
    RunSucceeded {
        outputs: Vec<Value>,
    },
    RunFailed {
        error: String,
    },
}

impl GraphEngineEvent {
    pub fn step(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::StepStarted { step, .. }
            | GraphEngineEvent::StepSucceeded { step, .. }
            | GraphEngineEvent::StepSkipped { step }
            | GraphEngineEvent::BranchSelected { step, .. }
            | GraphEngineEvent::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }
}
