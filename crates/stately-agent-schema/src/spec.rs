use serde::{Deserialize, Serialize};

use stately_agent_core::{AgentError, Result};

use crate::builder::{SchemaBundle, build_schemas};
use crate::field::FieldMap;

/// Declarative context and event descriptors, usually loaded from YAML.
///
/// ```yaml
/// context:
///   score:
///     type: number
/// events:
///   submit:
///     type: object
///     properties:
///       answer:
///         type: string
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaSpec {
    #[serde(default)]
    pub context: FieldMap,
    #[serde(default)]
    pub events: FieldMap,
}

impl SchemaSpec {
    pub fn new(context: FieldMap, events: FieldMap) -> Self {
        Self { context, events }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| AgentError::InvalidSchema(e.to_string()))
    }

    /// Reads descriptors already parsed as part of a larger YAML document.
    pub fn from_yaml_value(value: serde_yaml::Value) -> Result<Self> {
        serde_yaml::from_value(value).map_err(|e| AgentError::InvalidSchema(e.to_string()))
    }

    pub fn build(&self) -> Result<SchemaBundle> {
        build_schemas(&self.context, &self.events)
    }
}
