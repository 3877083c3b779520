use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::HashSet;

use stately_agent_core::{AgentError, Result};

use crate::event::{EventSchemas, normalize_event};
use crate::field::{FieldDescriptor, FieldKind, FieldMap};
use crate::typed::TypedSchemas;

/// Canonical schemas for one agent: the closed context schema and one closed,
/// discriminant-tagged schema per event. Built once at configuration time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaBundle {
    pub context: Value,
    pub events: EventSchemas,
}

impl SchemaBundle {
    /// Pairs the bundle with the Rust types it describes. Fails if the types
    /// derived from `C` and `E` drift from the declared schemas.
    pub fn pair<C, E>(self) -> Result<TypedSchemas<C, E>>
    where
        C: schemars::JsonSchema + DeserializeOwned,
        E: schemars::JsonSchema + DeserializeOwned,
    {
        TypedSchemas::new(self)
    }

    /// Field names required by the context schema, in declaration order.
    pub fn context_fields(&self) -> Vec<&str> {
        self.context
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Builds canonical schemas from context field and event descriptors.
///
/// Every context field becomes required and no other field is permitted.
/// Each event gets a `type` property fixed to its name. Duplicate names and
/// malformed descriptors fail with `InvalidSchema`.
pub fn build_schemas(context: &FieldMap, events: &FieldMap) -> Result<SchemaBundle> {
    let context = closed_object(context, "context")?;

    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(events.len());
    for (name, descriptor) in events.iter() {
        if !seen.insert(name) {
            return Err(AgentError::InvalidSchema(format!(
                "duplicate event name '{}'",
                name
            )));
        }
        normalized.push(normalize_event(name, descriptor)?);
    }

    tracing::debug!(
        context_fields = context["required"].as_array().map_or(0, Vec::len),
        events = normalized.len(),
        "Built canonical schemas"
    );

    Ok(SchemaBundle {
        context,
        events: EventSchemas::new(normalized),
    })
}

/// Builds canonical schemas from untyped JSON descriptor mappings.
pub fn build_schemas_from_values(context: &Value, events: &Value) -> Result<SchemaBundle> {
    let context: FieldMap = parse_descriptors(context, "context")?;
    let events: FieldMap = parse_descriptors(events, "events")?;
    build_schemas(&context, &events)
}

fn parse_descriptors<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T> {
    if !value.is_object() {
        return Err(AgentError::InvalidSchema(format!(
            "{} descriptors must be a mapping",
            what
        )));
    }
    serde_json::from_value(value.clone())
        .map_err(|e| AgentError::InvalidSchema(format!("{}: {}", what, e)))
}

/// Object schema with every declared property required and nothing else
/// allowed.
pub(crate) fn closed_object(fields: &FieldMap, path: &str) -> Result<Value> {
    let (properties, required) = canonical_properties(fields, path)?;
    Ok(json!({
        "type": "object",
        "properties": properties,
        "additionalProperties": false,
        "required": required,
    }))
}

pub(crate) fn canonical_properties(
    fields: &FieldMap,
    path: &str,
) -> Result<(Map<String, Value>, Vec<Value>)> {
    let mut properties = Map::new();
    let mut required = Vec::with_capacity(fields.len());

    for (name, field) in fields.iter() {
        let field_path = format!("{}.{}", path, name);
        if name.trim().is_empty() {
            return Err(AgentError::InvalidSchema(format!(
                "{}: field names must be non-empty",
                path
            )));
        }
        if properties.contains_key(name) {
            return Err(AgentError::InvalidSchema(format!(
                "duplicate field '{}'",
                field_path
            )));
        }
        properties.insert(name.to_string(), canonical_field(field, &field_path)?);
        required.push(Value::String(name.to_string()));
    }

    Ok((properties, required))
}

fn canonical_field(field: &FieldDescriptor, path: &str) -> Result<Value> {
    if !field.properties.is_empty() && field.kind != FieldKind::Object {
        return Err(AgentError::InvalidSchema(format!(
            "{}: 'properties' is only allowed on object fields, found {}",
            path, field.kind
        )));
    }

    let mut schema = Map::new();
    schema.insert("type".into(), Value::String(field.kind.as_str().into()));
    if let Some(description) = &field.description {
        schema.insert("description".into(), Value::String(description.clone()));
    }

    match (field.kind, &field.items) {
        (FieldKind::Array, Some(items)) => {
            schema.insert(
                "items".into(),
                canonical_field(items, &format!("{}[]", path))?,
            );
        }
        (FieldKind::Array, None) => {
            return Err(AgentError::InvalidSchema(format!(
                "{}: array fields must declare 'items'",
                path
            )));
        }
        (kind, Some(_)) => {
            return Err(AgentError::InvalidSchema(format!(
                "{}: 'items' is only allowed on array fields, found {}",
                path, kind
            )));
        }
        (FieldKind::Object, None) => {
            let (properties, required) = canonical_properties(&field.properties, path)?;
            schema.insert("properties".into(), Value::Object(properties));
            schema.insert("additionalProperties".into(), Value::Bool(false));
            schema.insert("required".into(), Value::Array(required));
        }
        _ => {}
    }

    if let Some(values) = &field.enum_values {
        if values.is_empty() {
            return Err(AgentError::InvalidSchema(format!(
                "{}: 'enum' must list at least one value",
                path
            )));
        }
        if let Some(bad) = values.iter().find(|v| !field.kind.accepts(v)) {
            return Err(AgentError::InvalidSchema(format!(
                "{}: enum value {} is not a {}",
                path, bad, field.kind
            )));
        }
        schema.insert("enum".into(), Value::Array(values.clone()));
    }

    Ok(Value::Object(schema))
}
