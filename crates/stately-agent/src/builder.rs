use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use stately_agent_actors::StatelyAgentAdapter;
use stately_agent_core::{AgentError, CompletionTransport, Result};
use stately_agent_llm::{MockTransport, OpenAiTransport};
use stately_agent_schema::{EventValidator, SchemaBundle, TypedSchemas};

use crate::spec::{AgentSpec, ProviderKind, ProviderSpec};

/// Canonical schemas plus the adapter that builds actors for them.
#[derive(Debug, Clone)]
pub struct Agent {
    schemas: SchemaBundle,
    adapter: StatelyAgentAdapter,
}

impl Agent {
    pub fn schemas(&self) -> &SchemaBundle {
        &self.schemas
    }

    pub fn adapter(&self) -> &StatelyAgentAdapter {
        &self.adapter
    }

    /// Validator for events produced by event-choice actors.
    pub fn event_validator(&self) -> Result<EventValidator> {
        self.schemas.events.validator()
    }

    /// Pairs the schemas with the Rust types the machine uses.
    pub fn typed<C, E>(&self) -> Result<TypedSchemas<C, E>>
    where
        C: schemars::JsonSchema + serde::de::DeserializeOwned,
        E: schemars::JsonSchema + serde::de::DeserializeOwned,
    {
        self.schemas.clone().pair::<C, E>()
    }

    pub fn into_parts(self) -> (SchemaBundle, StatelyAgentAdapter) {
        (self.schemas, self.adapter)
    }
}

pub struct AgentBuilder {
    spec: Option<AgentSpec>,
    model: Option<String>,
    transport: Option<Arc<dyn CompletionTransport>>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            spec: None,
            model: None,
            transport: None,
        }
    }

    pub fn from_spec(spec: AgentSpec) -> Self {
        Self {
            spec: Some(spec),
            model: None,
            transport: None,
        }
    }

    pub fn from_yaml(yaml_content: &str) -> Result<Self> {
        let spec = AgentSpec::from_yaml(yaml_content)?;
        spec.validate()?;
        Ok(Self::from_spec(spec))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Overrides the model named in the `AgentSpec`.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Uses `transport` instead of the one `ProviderSpec` describes.
    pub fn transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Agent> {
        let spec = match (self.spec, self.model) {
            (Some(mut spec), Some(model)) => {
                spec.model = model;
                spec
            }
            (Some(spec), None) => spec,
            (None, Some(model)) => AgentSpec::new(model),
            (None, None) => {
                return Err(AgentError::Config(
                    "no agent spec or model provided".to_string(),
                ));
            }
        };
        spec.validate()?;

        let schemas = spec.schemas.build()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => create_transport(&spec.provider)?,
        };

        info!(
            model = %spec.model,
            provider = transport.provider_name(),
            context_fields = schemas.context_fields().len(),
            events = schemas.events.len(),
            "Agent configured"
        );

        Ok(Agent {
            schemas,
            adapter: StatelyAgentAdapter::new(spec.model, transport),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn create_transport(provider: &ProviderSpec) -> Result<Arc<dyn CompletionTransport>> {
    match provider.kind {
        ProviderKind::Mock => Ok(Arc::new(MockTransport::new("mock"))),
        ProviderKind::OpenAi => {
            let mut builder = OpenAiTransport::builder();
            if let Some(base_url) = &provider.base_url {
                builder = builder.base_url(base_url);
            }
            if let Some(env_var) = &provider.api_key_env {
                builder = builder.api_key_env(env_var);
            }
            if let Some(secs) = provider.timeout_secs {
                builder = builder.timeout(Duration::from_secs(secs));
            }
            let transport = builder
                .build()
                .map_err(|e| AgentError::Config(format!("failed to create transport: {e}")))?;
            Ok(Arc::new(transport))
        }
    }
}
