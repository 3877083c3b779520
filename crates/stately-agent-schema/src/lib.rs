//! Schema builder for agent context and events
//!
//! Turns declarative field and event descriptors into closed JSON schemas
//! that a state-machine configuration can consume, and pairs them with Rust
//! types so context values and events can be decoded into concrete structures.

mod builder;
mod event;
mod field;
mod spec;
mod typed;
mod validator;

pub use builder::{SchemaBundle, build_schemas, build_schemas_from_values};
pub use event::{EventSchema, EventSchemas, normalize_event};
pub use field::{FieldDescriptor, FieldKind, FieldMap};
pub use spec::SchemaSpec;
pub use typed::{SchemaTypes, TypedSchemas};
pub use validator::{CompiledSchema, EventValidator};

pub use stately_agent_core::{AgentError, MachineEvent, Result};

/// Derives the JSON schema of a Rust type.
pub fn generate_schema<T: schemars::JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({}))
}
