//! Pairing of canonical schemas with the Rust types they describe.
//!
//! Schemas are declared as data, so the context and event value types are
//! declared separately as Rust types. `TypedSchemas` checks at startup that
//! the two never drift apart, then decodes values into those types.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::marker::PhantomData;

use stately_agent_core::event::EVENT_TYPE_KEY;
use stately_agent_core::{AgentError, MachineEvent, Result};

use crate::builder::SchemaBundle;
use crate::generate_schema;

/// Value types described by a schema bundle.
pub trait SchemaTypes {
    type Context;
    type Event;
}

pub struct TypedSchemas<C, E> {
    bundle: SchemaBundle,
    _types: PhantomData<fn() -> (C, E)>,
}

impl<C, E> SchemaTypes for TypedSchemas<C, E> {
    type Context = C;
    type Event = E;
}

impl<C, E> std::fmt::Debug for TypedSchemas<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedSchemas")
            .field("context", &std::any::type_name::<C>())
            .field("event", &std::any::type_name::<E>())
            .finish()
    }
}

impl<C, E> Clone for TypedSchemas<C, E> {
    fn clone(&self) -> Self {
        Self {
            bundle: self.bundle.clone(),
            _types: PhantomData,
        }
    }
}

impl<C, E> TypedSchemas<C, E>
where
    C: schemars::JsonSchema + DeserializeOwned,
    E: schemars::JsonSchema + DeserializeOwned,
{
    pub fn new(bundle: SchemaBundle) -> Result<Self> {
        let mut drift = context_drift(&bundle.context, &generate_schema::<C>());
        drift.extend(event_drift(&bundle, &generate_schema::<E>()));

        if !drift.is_empty() {
            return Err(AgentError::InvalidSchema(format!(
                "paired types drift from declared schemas: {}",
                drift.join("; ")
            )));
        }

        Ok(Self {
            bundle,
            _types: PhantomData,
        })
    }

    pub fn schemas(&self) -> &SchemaBundle {
        &self.bundle
    }

    pub fn into_bundle(self) -> SchemaBundle {
        self.bundle
    }

    pub fn decode_context(&self, value: Value) -> Result<C> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn decode_event(&self, event: &MachineEvent) -> Result<E> {
        Ok(serde_json::from_value(event.to_value())?)
    }
}

fn context_drift(declared: &Value, derived: &Value) -> Vec<String> {
    let (properties, required) = object_fields(derived, derived);
    fields_drift("context", declared, &properties, &required)
}

/// Compares the declared properties of an object schema with the fields of
/// the Rust type paired to it.
fn fields_drift(
    owner: &str,
    declared: &Value,
    derived: &Map<String, Value>,
    derived_required: &BTreeSet<String>,
) -> Vec<String> {
    let mut drift = Vec::new();
    let declared_props = declared.get("properties").and_then(Value::as_object);

    if let Some(declared_props) = declared_props {
        for (name, schema) in declared_props {
            let Some(field) = derived.get(name) else {
                drift.push(format!("{}: field '{}' is missing from the type", owner, name));
                continue;
            };
            if !derived_required.contains(name) {
                drift.push(format!("{}: field '{}' is optional in the type", owner, name));
            }
            if !kinds_compatible(schema.get("type"), field.get("type")) {
                drift.push(format!(
                    "{}: field '{}' is {} in the schema but {} in the type",
                    owner,
                    name,
                    schema.get("type").unwrap_or(&Value::Null),
                    field.get("type").unwrap_or(&Value::Null)
                ));
            }
        }
    }

    for name in derived.keys() {
        if !declared_props.is_some_and(|p| p.contains_key(name)) {
            drift.push(format!(
                "{}: type field '{}' is not declared in the schema",
                owner, name
            ));
        }
    }

    drift
}

fn kinds_compatible(declared: Option<&Value>, derived: Option<&Value>) -> bool {
    let (Some(Value::String(declared)), Some(derived)) = (declared, derived) else {
        // References and compound schemas are not compared
        return true;
    };
    match derived {
        Value::String(derived) => {
            declared == derived || (declared == "number" && derived == "integer")
        }
        Value::Array(kinds) => kinds.iter().any(|k| k.as_str() == Some(declared.as_str())),
        _ => true,
    }
}

fn event_drift(bundle: &SchemaBundle, derived: &Value) -> Vec<String> {
    let variants = event_variants(derived);
    let tags: BTreeSet<&str> = variants.iter().map(|(tag, _)| tag.as_str()).collect();

    let mut drift = Vec::new();
    for name in bundle.events.names().filter(|n| !tags.contains(n)) {
        drift.push(format!("event '{}' has no variant in the type", name));
    }
    for (tag, variant) in &variants {
        let Some(event) = bundle.events.get(tag) else {
            drift.push(format!("event variant '{}' is not declared in the schema", tag));
            continue;
        };
        let (mut properties, mut required) = object_fields(variant, derived);
        properties.remove(EVENT_TYPE_KEY);
        required.remove(EVENT_TYPE_KEY);
        drift.extend(fields_drift(
            &format!("event '{}'", tag),
            event.payload_schema(),
            &properties,
            &required,
        ));
    }
    drift
}

/// Variants of an internally tagged enum schema, keyed by discriminant.
fn event_variants(root: &Value) -> Vec<(String, &Value)> {
    let variants = ["oneOf", "anyOf"]
        .iter()
        .find_map(|key| root.get(*key).and_then(Value::as_array));

    match variants {
        Some(variants) => variants
            .iter()
            .filter_map(|variant| variant_tag(variant, root).map(|tag| (tag, variant)))
            .collect(),
        None => variant_tag(root, root)
            .map(|tag| (tag, root))
            .into_iter()
            .collect(),
    }
}

fn variant_tag(schema: &Value, root: &Value) -> Option<String> {
    let schema = resolve_ref(schema, root);
    if let Some(tag) = schema.pointer(&format!("/properties/{}", EVENT_TYPE_KEY)) {
        let value = tag
            .get("const")
            .or_else(|| tag.get("enum").and_then(|e| e.get(0)))?;
        return value.as_str().map(str::to_string);
    }
    schema
        .get("allOf")
        .and_then(Value::as_array)?
        .iter()
        .find_map(|part| variant_tag(part, root))
}

/// Properties and required names of an object schema, following `$ref`
/// and merging `allOf` parts.
fn object_fields(schema: &Value, root: &Value) -> (Map<String, Value>, BTreeSet<String>) {
    let schema = resolve_ref(schema, root);
    let mut properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let mut required: BTreeSet<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
        for part in parts {
            let (part_properties, part_required) = object_fields(part, root);
            properties.extend(part_properties);
            required.extend(part_required);
        }
    }
    (properties, required)
}

fn resolve_ref<'a>(schema: &'a Value, root: &'a Value) -> &'a Value {
    schema
        .get("$ref")
        .and_then(Value::as_str)
        .and_then(|r| r.strip_prefix('#'))
        .and_then(|pointer| root.pointer(pointer))
        .unwrap_or(schema)
}
