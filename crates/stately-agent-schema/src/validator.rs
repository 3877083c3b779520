use jsonschema::{Draft, Validator};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use stately_agent_core::{AgentError, MachineEvent, Result};

use crate::event::EventSchemas;

/// A JSON schema compiled for repeated validation.
#[derive(Clone)]
pub struct CompiledSchema {
    schema: Value,
    validator: Arc<Validator>,
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("schema", &self.schema)
            .finish()
    }
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(schema)
            .map_err(|err| AgentError::InvalidSchema(format!("invalid schema: {err}")))?;
        Ok(Self {
            schema: schema.clone(),
            validator: Arc::new(validator),
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// All validation failures for `instance`; empty when it is valid.
    pub fn errors(&self, instance: &Value) -> Vec<String> {
        self.validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect()
    }
}

/// Checks mapped events against their canonical schemas.
#[derive(Debug, Clone)]
pub struct EventValidator {
    schemas: EventSchemas,
    compiled: HashMap<String, CompiledSchema>,
}

impl EventValidator {
    pub fn new(schemas: EventSchemas) -> Result<Self> {
        let compiled = schemas
            .iter()
            .map(|event| Ok((event.name().to_string(), CompiledSchema::compile(event.schema())?)))
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { schemas, compiled })
    }

    pub fn schemas(&self) -> &EventSchemas {
        &self.schemas
    }

    /// Returns a description of why the event is rejected, if it is.
    pub fn check(&self, event: &MachineEvent) -> std::result::Result<(), String> {
        let Some(schema) = self.compiled.get(&event.event_type) else {
            return Err(format!("'{}' is not a declared event", event.event_type));
        };
        let errors = schema.errors(&event.to_value());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}
