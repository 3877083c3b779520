use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

use stately_agent_core::event::EVENT_TYPE_KEY;
use stately_agent_core::{AgentError, FUNCTION_NAME_PATTERN, FunctionDefinition, Result};

use crate::builder::canonical_properties;
use crate::field::{FieldDescriptor, FieldKind};
use crate::validator::EventValidator;

/// Canonical schema of one event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventSchema {
    name: String,
    description: Option<String>,
    schema: Value,
    payload: Value,
}

impl EventSchema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Full event schema including the `type` discriminant.
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Closed schema of the payload alone, without the discriminant.
    pub fn payload_schema(&self) -> &Value {
        &self.payload
    }

    /// Function the model calls to emit this event. The function name is the
    /// event name, so the arguments only carry the payload.
    pub fn function_definition(&self) -> FunctionDefinition {
        let definition = FunctionDefinition::new(&self.name, self.payload.clone());
        match &self.description {
            Some(description) => definition.with_description(description),
            None => definition,
        }
    }
}

/// Wraps an event payload descriptor into a closed object schema whose
/// `type` property is fixed to the event name.
pub fn normalize_event(name: &str, descriptor: &FieldDescriptor) -> Result<EventSchema> {
    if name.trim().is_empty() {
        return Err(AgentError::InvalidSchema(
            "event names must be non-empty".to_string(),
        ));
    }
    // Event names double as function names in event-choice requests
    if !FunctionDefinition::is_valid_name(name) {
        return Err(AgentError::InvalidSchema(format!(
            "event name '{}' must match {}",
            name, FUNCTION_NAME_PATTERN
        )));
    }
    if descriptor.kind != FieldKind::Object {
        return Err(AgentError::InvalidSchema(format!(
            "event '{}' must be described as an object, found {}",
            name, descriptor.kind
        )));
    }
    if descriptor.properties.contains(EVENT_TYPE_KEY) {
        return Err(AgentError::InvalidSchema(format!(
            "event '{}' declares the reserved '{}' property",
            name, EVENT_TYPE_KEY
        )));
    }

    let path = format!("events.{}", name);
    let (payload_properties, payload_required) =
        canonical_properties(&descriptor.properties, &path)?;

    let mut properties = serde_json::Map::with_capacity(payload_properties.len() + 1);
    properties.insert(
        EVENT_TYPE_KEY.to_string(),
        json!({ "type": "string", "const": name }),
    );
    properties.extend(payload_properties.clone());

    let mut required = vec![Value::String(EVENT_TYPE_KEY.to_string())];
    required.extend(payload_required.iter().cloned());

    let mut schema = json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
        "required": required,
    });
    let mut payload = json!({
        "type": "object",
        "properties": payload_properties,
        "additionalProperties": false,
        "required": payload_required,
    });
    if let Some(description) = &descriptor.description {
        schema["description"] = Value::String(description.clone());
        payload["description"] = Value::String(description.clone());
    }

    Ok(EventSchema {
        name: name.to_string(),
        description: descriptor.description.clone(),
        schema,
        payload,
    })
}

/// Canonical event schemas in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventSchemas {
    entries: Vec<EventSchema>,
}

impl EventSchemas {
    pub(crate) fn new(entries: Vec<EventSchema>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&EventSchema> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventSchema> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        self.entries
            .iter()
            .map(EventSchema::function_definition)
            .collect()
    }

    /// Compiles one validator per event.
    pub fn validator(&self) -> Result<EventValidator> {
        EventValidator::new(self.clone())
    }

    /// Mapping from event name to event schema.
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|e| (e.name.clone(), e.schema.clone()))
                .collect(),
        )
    }
}

impl Serialize for EventSchemas {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.name, &entry.schema)?;
        }
        map.end()
    }
}
