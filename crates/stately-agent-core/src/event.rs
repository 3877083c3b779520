//! Events dispatched into a running state machine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};

/// Key of the discriminant field carried by every event.
pub const EVENT_TYPE_KEY: &str = "type";

/// A machine event: a discriminant `type` plus payload properties, serialized
/// flat as `{"type": "...", ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl MachineEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Builds an event from a JSON object of payload properties. A `type` key
    /// inside the payload must agree with `event_type`.
    pub fn from_payload(event_type: impl Into<String>, payload: Value) -> Result<Self> {
        let event_type = event_type.into();
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(AgentError::Serialization(format!(
                    "event payload must be a JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };

        if let Some(declared) = payload.remove(EVENT_TYPE_KEY) {
            if declared.as_str() != Some(event_type.as_str()) {
                return Err(AgentError::Serialization(format!(
                    "payload type {} does not match event '{}'",
                    declared, event_type
                )));
            }
        }

        Ok(Self {
            event_type,
            payload,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::with_capacity(self.payload.len() + 1);
        map.insert(
            EVENT_TYPE_KEY.to_string(),
            Value::String(self.event_type.clone()),
        );
        for (k, v) in &self.payload {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
