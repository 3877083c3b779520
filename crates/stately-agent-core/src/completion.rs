//! Chat completion request, result and chunk types

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::message::{ChatMessage, ToolCall};

/// Names a function-calling API accepts.
pub const FUNCTION_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]{1,64}$";

static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FUNCTION_NAME_PATTERN).expect("function name pattern compiles"));

/// A function the model may call, described by a JSON schema for its
/// parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_valid_name(name: &str) -> bool {
        FUNCTION_NAME.is_match(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Required,
    None,
    Function(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<FunctionDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Number of choices to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// Provider-specific passthrough fields.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            tool_choice: None,
            temperature: None,
            max_tokens: None,
            n: None,
            extra: HashMap::new(),
        }
    }

    /// A single user-message request.
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self::new(model).with_message(ChatMessage::user(prompt))
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = ChatMessage>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_tool(mut self, tool: FunctionDefinition) -> Self {
        self.upsert_tool(tool);
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_n(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Adds a function definition, replacing one with the same name in place.
    pub fn upsert_tool(&mut self, tool: FunctionDefinition) {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCall,
    ContentFilter,
    Error,
    Other,
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "function_call" => FinishReason::ToolCall,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Other,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, FinishReason::Stop | FinishReason::ToolCall)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FinishReason::Error | FinishReason::ContentFilter)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

impl Choice {
    pub fn new(index: u32, message: ChatMessage, finish_reason: FinishReason) -> Self {
        Self {
            index,
            message,
            finish_reason,
        }
    }

    pub fn text(index: u32, content: impl Into<String>) -> Self {
        Self::new(index, ChatMessage::assistant(content), FinishReason::Stop)
    }

    pub fn tool_call(index: u32, call: ToolCall) -> Self {
        Self::new(
            index,
            ChatMessage::assistant_tool_calls(vec![call]),
            FinishReason::ToolCall,
        )
    }
}

/// Full result of a one-shot completion. Choices keep the order the API
/// returned them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ChatCompletion {
    pub fn new(id: impl Into<String>, model: impl Into<String>, choices: Vec<Choice>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            choices,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// All tool calls across all choices, in response order.
    pub fn tool_calls(&self) -> impl Iterator<Item = (usize, &ToolCall)> {
        self.choices
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.message.tool_calls.iter().map(move |call| (i, call)))
    }
}

/// Incremental fragment of a function call in a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub index: u32,
    pub delta: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallDelta>,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl CompletionChunk {
    pub fn new(delta: impl Into<String>, is_final: bool) -> Self {
        Self {
            index: 0,
            delta: delta.into(),
            tool_calls: Vec::new(),
            is_final,
            finish_reason: None,
            usage: None,
        }
    }

    pub fn final_chunk(
        delta: impl Into<String>,
        finish_reason: FinishReason,
        usage: Option<TokenUsage>,
    ) -> Self {
        Self {
            index: 0,
            delta: delta.into(),
            tool_calls: Vec::new(),
            is_final: true,
            finish_reason: Some(finish_reason),
            usage,
        }
    }

    pub fn with_tool_call(mut self, delta: ToolCallDelta) -> Self {
        self.tool_calls.push(delta);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_names() {
        assert!(FunctionDefinition::is_valid_name("submit_answer"));
        assert!(FunctionDefinition::is_valid_name("give-up"));
        assert!(FunctionDefinition::is_valid_name(&"x".repeat(64)));
        assert!(!FunctionDefinition::is_valid_name(""));
        assert!(!FunctionDefinition::is_valid_name("quiz.submit"));
        assert!(!FunctionDefinition::is_valid_name("web search"));
        assert!(!FunctionDefinition::is_valid_name(&"x".repeat(65)));
    }

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(100, 50);
        assert_eq!(usage.total_tokens, 150);
    }

    #[test]
    fn test_finish_reason_from_wire() {
        assert_eq!(FinishReason::from_wire("tool_calls"), FinishReason::ToolCall);
        assert_eq!(FinishReason::from_wire("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_wire("weird"), FinishReason::Other);
        assert!(FinishReason::ToolCall.is_complete());
        assert!(FinishReason::ContentFilter.is_error());
    }

    #[test]
    fn test_upsert_tool_replaces_by_name() {
        let mut request = ChatRequest::prompt("gpt-4o-mini", "hi")
            .with_tool(FunctionDefinition::new("search", serde_json::json!({"type": "object"})));
        request.upsert_tool(
            FunctionDefinition::new("search", serde_json::json!({"type": "object"}))
                .with_description("Search the web"),
        );
        request.upsert_tool(FunctionDefinition::new(
            "lookup",
            serde_json::json!({"type": "object"}),
        ));

        assert_eq!(request.tools.len(), 2);
        assert_eq!(request.tools[0].description.as_deref(), Some("Search the web"));
        assert_eq!(request.tools[1].name, "lookup");
    }

    #[test]
    fn test_tool_calls_across_choices_keep_order() {
        let completion = ChatCompletion::new(
            "cmpl",
            "m",
            vec![
                Choice::tool_call(0, ToolCall::new("a", "first", "{}")),
                Choice::text(1, "no call"),
                Choice::new(
                    2,
                    ChatMessage::assistant_tool_calls(vec![
                        ToolCall::new("b", "second", "{}"),
                        ToolCall::new("c", "third", "{}"),
                    ]),
                    FinishReason::ToolCall,
                ),
            ],
        );

        let names: Vec<_> = completion
            .tool_calls()
            .map(|(i, c)| (i, c.name.as_str()))
            .collect();
        assert_eq!(names, vec![(0, "first"), (2, "second"), (2, "third")]);
        assert_eq!(completion.content(), Some(""));
    }

    #[test]
    fn test_request_extra_flattens() {
        let request = ChatRequest::prompt("m", "hi").with_extra("seed", serde_json::json!(7));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["seed"], 7);
        assert!(json.get("tools").is_none());
    }
}
