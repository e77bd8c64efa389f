//! DSL parser: converts raw YAML/JSON text into [`WorkflowSpecification`].

use super::schema::WorkflowSpecification;
use crate::error::WorkflowError;

/// Supported DSL input formats.
#[derive(Debug, Clone, Copy)]
pub enum DslFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
}

/// Parse DSL content into WorkflowSpecification
pub fn parse_dsl(content: &str, format: DslFormat) -> Result<WorkflowSpecification, WorkflowError> {
    match format {
        DslFormat::Yaml => {
            serde_saphyr::from_str(content).map_err(|e| WorkflowError::DslParseError(e.to_string()))
        }
        DslFormat::Json => {
            serde_json::from_str(content).map_err(|e| WorkflowError::DslParseError(e.to_string()))
        }
    }
}
