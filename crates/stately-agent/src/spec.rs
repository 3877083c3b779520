//! YAML agent configuration

use serde::{Deserialize, Serialize};

use stately_agent_core::{AgentError, Result};
use stately_agent_schema::SchemaSpec;

/// Declarative description of an agent: the model, how to reach it, and the
/// context and event schemas of its state machine.
///
/// ```yaml
/// model: gpt-4o-mini
/// provider:
///   kind: openai
///   api_key_env: OPENAI_API_KEY
/// schemas:
///   context:
///     score:
///       type: number
///   events:
///     submit:
///       type: object
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSpec {
    pub model: String,

    #[serde(default)]
    pub provider: ProviderSpec,

    #[serde(default)]
    pub schemas: SchemaSpec,
}

impl AgentSpec {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: ProviderSpec::default(),
            schemas: SchemaSpec::default(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderSpec) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_schemas(mut self, schemas: SchemaSpec) -> Self {
        self.schemas = schemas;
        self
    }

    /// Parses a YAML agent document. Malformed descriptors under `schemas`
    /// are `InvalidSchema`; every other problem is a configuration error.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut document: serde_yaml::Mapping = serde_yaml::from_str(yaml)?;
        let schemas = match document.remove("schemas") {
            Some(value) => SchemaSpec::from_yaml_value(value)?,
            None => SchemaSpec::default(),
        };
        let spec: AgentSpec = serde_yaml::from_value(serde_yaml::Value::Mapping(document))?;
        Ok(spec.with_schemas(schemas))
    }

    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(AgentError::Config("model must not be empty".to_string()));
        }
        if self.provider.timeout_secs == Some(0) {
            return Err(AgentError::Config(
                "provider timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    /// Scripted in-process transport, for tests and dry runs.
    Mock,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSpec {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}
