use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Null => "null",
        }
    }

    /// Whether a literal JSON value belongs to this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Null => value.is_null(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic type declaration for one context field or one event payload.
/// Descriptors never carry default values; `default` is rejected when
/// deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub kind: FieldKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub properties: FieldMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldDescriptor>>,

    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl FieldDescriptor {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            description: None,
            properties: FieldMap::new(),
            items: None,
            enum_values: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldKind::String)
    }

    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    pub fn integer() -> Self {
        Self::new(FieldKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    pub fn object() -> Self {
        Self::new(FieldKind::Object)
    }

    pub fn array(items: FieldDescriptor) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::new(FieldKind::Array)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.properties.push(name, field);
        self
    }

    pub fn with_enum(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.enum_values = Some(values.into_iter().collect());
        self
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// Named field descriptors in declaration order.
///
/// Entries are kept exactly as declared, duplicates included, so the builder
/// can reject them instead of silently keeping one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldDescriptor)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, field: FieldDescriptor) -> Self {
        self.push(name, field);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, field: FieldDescriptor) {
        self.entries.push((name.into(), field));
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.entries.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldDescriptor)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (K, FieldDescriptor)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, f)| (k.into(), f)).collect(),
        }
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, field) in &self.entries {
            map.serialize_entry(name, field)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping from field name to field descriptor")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, field)) = access.next_entry::<String, FieldDescriptor>()? {
                    entries.push((name, field));
                }
                Ok(FieldMap { entries })
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_deserialize() {
        let field = FieldDescriptor::from_value(json!({
            "type": "object",
            "description": "user profile",
            "properties": {
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        }))
        .unwrap();

        assert_eq!(field.kind, FieldKind::Object);
        assert_eq!(field.description.as_deref(), Some("user profile"));
        assert_eq!(field.properties.names().collect::<Vec<_>>(), vec!["name", "tags"]);
        let tags = field.properties.get("tags").unwrap();
        assert_eq!(tags.items.as_ref().unwrap().kind, FieldKind::String);
    }

    #[test]
    fn test_default_values_rejected() {
        let result = FieldDescriptor::from_value(json!({"type": "number", "default": 0}));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(FieldDescriptor::from_value(json!({"type": "date"})).is_err());
    }

    #[test]
    fn test_field_map_preserves_declaration_order() {
        let yaml = "zeta:\n  type: string\nalpha:\n  type: number\nmid:\n  type: boolean\n";
        let map: FieldMap = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(map.names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);

        let json = serde_json::to_string(&map).unwrap();
        assert!(json.find("zeta").unwrap() < json.find("alpha").unwrap());
    }

    #[test]
    fn test_kind_accepts() {
        assert!(FieldKind::Integer.accepts(&json!(3)));
        assert!(!FieldKind::Integer.accepts(&json!(3.5)));
        assert!(FieldKind::Number.accepts(&json!(3.5)));
        assert!(FieldKind::Null.accepts(&Value::Null));
        assert!(!FieldKind::String.accepts(&json!(1)));
    }
}
