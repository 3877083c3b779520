use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use stately_agent_core::event::EVENT_TYPE_KEY;
use stately_agent_core::{
    AgentError, FUNCTION_NAME_PATTERN, FunctionDefinition, MachineEvent, PromiseLogic, Result,
    ToolCall,
};
use stately_agent_schema::CompiledSchema;

/// Key under which a nested tool's result is placed in the produced event.
pub const OUTPUT_KEY: &str = "output";

pub type ToolPromise = Arc<dyn PromiseLogic<Value, Output = Value>>;

/// Nested logic behind a tool.
#[derive(Clone)]
pub enum ToolLogic {
    /// Invoked in place with the validated call arguments.
    Promise(ToolPromise),
    /// Named actor the executor spawns from the produced event.
    External(String),
}

impl std::fmt::Debug for ToolLogic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolLogic::Promise(_) => f.write_str("Promise"),
            ToolLogic::External(actor) => f.debug_tuple("External").field(actor).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tool {
    description: String,
    logic: ToolLogic,
    input_schema: Value,
}

impl Tool {
    pub fn new(description: impl Into<String>, logic: ToolLogic, input_schema: Value) -> Self {
        Self {
            description: description.into(),
            logic,
            input_schema,
        }
    }

    pub fn promise<L>(description: impl Into<String>, logic: L, input_schema: Value) -> Self
    where
        L: PromiseLogic<Value, Output = Value> + 'static,
    {
        Self::new(description, ToolLogic::Promise(Arc::new(logic)), input_schema)
    }

    pub fn external(
        description: impl Into<String>,
        actor: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self::new(description, ToolLogic::External(actor.into()), input_schema)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn logic(&self) -> &ToolLogic {
        &self.logic
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

#[derive(Debug, Clone)]
struct RegisteredTool {
    name: String,
    tool: Tool,
    input: CompiledSchema,
}

/// A tool call matched against the registry with validated arguments.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedCall<'a> {
    pub name: &'a str,
    pub tool: &'a Tool,
    pub arguments: Value,
    pub event: MachineEvent,
}

/// Named tools offered to the model, validated when registered.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tools<N, T>(tools: T) -> Result<Self>
    where
        N: Into<String>,
        T: IntoIterator<Item = (N, Tool)>,
    {
        let mut registry = Self::new();
        for (name, tool) in tools {
            registry.register(name, tool)?;
        }
        Ok(registry)
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: Tool) -> Result<Self> {
        self.register(name, tool)?;
        Ok(self)
    }

    pub fn register(&mut self, name: impl Into<String>, tool: Tool) -> Result<()> {
        let name = name.into();
        if !FunctionDefinition::is_valid_name(&name) {
            return Err(AgentError::Config(format!(
                "tool name '{}' must match {}",
                name, FUNCTION_NAME_PATTERN
            )));
        }
        if self.index.contains_key(&name) {
            return Err(AgentError::Config(format!(
                "tool '{}' is already registered",
                name
            )));
        }

        check_input_schema(&name, &tool.input_schema)?;
        let input = CompiledSchema::compile(&tool.input_schema).map_err(|err| {
            AgentError::InvalidSchema(format!("input schema of tool '{}': {}", name, err))
        })?;

        self.index.insert(name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { name, tool, input });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&i| &self.tools[i].tool)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tool names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function-calling descriptors, one per tool, in registration order.
    pub fn function_definitions(&self) -> Vec<FunctionDefinition> {
        self.tools
            .iter()
            .map(|t| {
                FunctionDefinition::new(&t.name, t.tool.input_schema.clone())
                    .with_description(&t.tool.description)
            })
            .collect()
    }

    /// Matches a call by name and validates its arguments.
    pub(crate) fn resolve<'a>(&'a self, call: &ToolCall) -> Result<ResolvedCall<'a>> {
        let registered = self
            .index
            .get(&call.name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

        let invalid = |errors: Vec<String>| AgentError::InvalidToolInput {
            tool: call.name.clone(),
            errors,
        };

        let arguments = call
            .parse_arguments()
            .map_err(|e| invalid(vec![format!("arguments are not valid JSON: {e}")]))?;
        let errors = registered.input.errors(&arguments);
        if !errors.is_empty() {
            return Err(invalid(errors));
        }
        let event = MachineEvent::from_payload(&registered.name, arguments.clone())
            .map_err(|e| invalid(vec![e.to_string()]))?;

        Ok(ResolvedCall {
            name: &registered.name,
            tool: &registered.tool,
            arguments,
            event,
        })
    }
}

fn check_input_schema(name: &str, schema: &Value) -> Result<()> {
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(AgentError::InvalidSchema(format!(
            "input schema of tool '{}' must be an object schema",
            name
        )));
    }
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for reserved in [EVENT_TYPE_KEY, OUTPUT_KEY] {
            if properties.contains_key(reserved) {
                return Err(AgentError::InvalidSchema(format!(
                    "input schema of tool '{}' declares the reserved '{}' property",
                    name, reserved
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stately_agent_core::{ActorScope, promise_fn};

    fn search_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn search_tool() -> Tool {
        Tool::promise(
            "Search the web",
            promise_fn(|args: Value, _scope: ActorScope| async move {
                Ok::<_, AgentError>(args)
            }),
            search_schema(),
        )
    }

    #[test]
    fn test_register_and_get() {
        let registry = ToolRegistry::new()
            .with_tool("search", search_tool())
            .unwrap()
            .with_tool("notify", Tool::external("Notify", "notifier", json!({"type": "object"})))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("search"));
        assert_eq!(registry.get("search").unwrap().description(), "Search the web");
        assert!(matches!(
            registry.get("notify").unwrap().logic(),
            ToolLogic::External(actor) if actor == "notifier"
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["search", "notify"]);
    }

    #[test]
    fn test_function_definitions() {
        let registry = ToolRegistry::from_tools([("search", search_tool())]).unwrap();
        let functions = registry.function_definitions();

        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].name, "search");
        assert_eq!(functions[0].description.as_deref(), Some("Search the web"));
        assert_eq!(functions[0].parameters, search_schema());
    }

    #[test]
    fn test_rejects_bad_registrations() {
        let mut registry = ToolRegistry::new();
        registry.register("search", search_tool()).unwrap();

        assert!(matches!(
            registry.register("search", search_tool()),
            Err(AgentError::Config(_))
        ));
        assert!(matches!(
            registry.register("web search", search_tool()),
            Err(AgentError::Config(_))
        ));
        assert!(registry.register("", search_tool()).is_err());
        assert!(registry.register("x".repeat(65), search_tool()).is_err());

        let not_object = Tool::external("x", "x", json!({"type": "string"}));
        assert!(matches!(
            registry.register("plain", not_object),
            Err(AgentError::InvalidSchema(_))
        ));

        for reserved in ["type", "output"] {
            let mut properties = serde_json::Map::new();
            properties.insert(reserved.to_string(), json!({"type": "string"}));
            let schema = json!({"type": "object", "properties": properties});
            assert!(matches!(
                registry.register("reserved", Tool::external("x", "x", schema)),
                Err(AgentError::InvalidSchema(_))
            ));
        }

        let broken = json!({"type": "object", "properties": {"q": {"type": 7}}});
        assert!(matches!(
            registry.register("broken", Tool::external("x", "x", broken)),
            Err(AgentError::InvalidSchema(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_calls() {
        let registry = ToolRegistry::from_tools([("search", search_tool())]).unwrap();

        let resolved = registry
            .resolve(&ToolCall::new("c1", "search", r#"{"query": "rust"}"#))
            .unwrap();
        assert_eq!(resolved.name, "search");
        assert_eq!(resolved.arguments, json!({"query": "rust"}));
        assert_eq!(resolved.event, MachineEvent::new("search").with("query", "rust"));

        assert!(matches!(
            registry.resolve(&ToolCall::new("c2", "lookup", "{}")),
            Err(AgentError::UnknownTool(name)) if name == "lookup"
        ));
        assert!(matches!(
            registry.resolve(&ToolCall::new("c3", "search", "{}")),
            Err(AgentError::InvalidToolInput { tool, .. }) if tool == "search"
        ));
        assert!(matches!(
            registry.resolve(&ToolCall::new("c4", "search", "{query")),
            Err(AgentError::InvalidToolInput { .. })
        ));
    }
}
