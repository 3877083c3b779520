use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use stately_agent_core::{
    ChatCompletion, ChatMessage, ChatRequest, Choice, ChunkStream, CompletionChunk,
    CompletionTransport, FinishReason, FunctionDefinition, Role, TokenUsage, ToolCall,
    ToolCallDelta, ToolChoice, TransportError, TransportFeature,
};

use super::sse::{SseDecoder, SseEvent};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Transport for OpenAI-compatible `/chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiTransport {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiTransport {
    pub fn new(api_key: impl Into<String>) -> Result<Self, TransportError> {
        Self::builder().api_key(api_key).build()
    }

    /// Reads the API key from `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> OpenAiTransportBuilder {
        OpenAiTransportBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, TransportError> {
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            stream = body.stream,
            "Sending completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    TransportError::Network(format!("Connection failed: {e}"))
                } else {
                    TransportError::Network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "Completion request rejected");
        Err(error_for_status(status.as_u16(), &body, retry_after))
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, TransportError> {
        let body = WireRequest::from_request(request, false);
        let response = self.send(&body).await?;

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("Failed to read response: {e}")))?;
        let wire: WireResponse = serde_json::from_str(&text).map_err(|e| {
            TransportError::Serialization(format!("Failed to parse response: {e}"))
        })?;

        Ok(wire.into_completion())
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, TransportError> {
        let body = WireRequest::from_request(request, true);
        let response = self.send(&body).await?;
        Ok(decode_chunk_stream(response.bytes_stream()))
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn supports(&self, feature: TransportFeature) -> bool {
        match feature {
            TransportFeature::Streaming
            | TransportFeature::FunctionCalling
            | TransportFeature::MultipleChoices
            | TransportFeature::SystemMessages => true,
        }
    }
}

pub struct OpenAiTransportBuilder {
    api_key: Option<String>,
    api_key_env: Option<String>,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl OpenAiTransportBuilder {
    pub fn new() -> Self {
        Self {
            api_key: None,
            api_key_env: None,
            base_url: None,
            timeout: None,
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn api_key_env(mut self, env_var: impl Into<String>) -> Self {
        self.api_key_env = Some(env_var.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Total request timeout, streamed bodies included.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<OpenAiTransport, TransportError> {
        let api_key = match self.api_key {
            Some(key) => key,
            None => {
                let env_var = self
                    .api_key_env
                    .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
                std::env::var(&env_var).map_err(|_| {
                    TransportError::Config(format!(
                        "API key not found in environment variable {}",
                        env_var
                    ))
                })?
            }
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| TransportError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(OpenAiTransport {
            client,
            api_key,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

impl Default for OpenAiTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn error_for_status(status: u16, body: &str, retry_after: Option<Duration>) -> TransportError {
    let message = serde_json::from_str::<WireErrorResponse>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status {
        401 | 403 => TransportError::Config(format!("Authentication failed: {message}")),
        429 => TransportError::RateLimit { retry_after },
        _ => TransportError::Api {
            message,
            status: Some(status),
        },
    }
}

/// Decodes a server-sent event byte stream into completion chunks. Ends at
/// `[DONE]` or end of input, and after the first error.
fn decode_chunk_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut bytes = Box::pin(bytes);
        let mut decoder = SseDecoder::new();

        while let Some(next) = bytes.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(TransportError::Network(format!("Stream interrupted: {e}")));
                    return;
                }
            };
            for event in decoder.push(chunk.as_ref()) {
                match event {
                    SseEvent::Done => return,
                    SseEvent::Data(data) => match parse_chunk(&data) {
                        Ok(chunks) => {
                            for chunk in chunks {
                                yield Ok(chunk);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    },
                }
            }
        }

        for event in decoder.finish() {
            let SseEvent::Data(data) = event else {
                return;
            };
            match parse_chunk(&data) {
                Ok(chunks) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };

    Box::new(Box::pin(stream))
}

fn parse_chunk(data: &str) -> Result<Vec<CompletionChunk>, TransportError> {
    let wire: WireChunk = serde_json::from_str(data)
        .map_err(|e| TransportError::Serialization(format!("Failed to parse chunk: {e}")))?;

    if wire.choices.is_empty() {
        // Usage-only trailer
        return Ok(wire
            .usage
            .map(|usage| CompletionChunk {
                usage: Some(usage),
                ..CompletionChunk::new("", false)
            })
            .into_iter()
            .collect());
    }

    Ok(wire
        .choices
        .into_iter()
        .map(|choice| {
            let finish_reason = choice.finish_reason.as_deref().map(FinishReason::from_wire);
            CompletionChunk {
                index: choice.index,
                delta: choice.delta.content.unwrap_or_default(),
                tool_calls: choice
                    .delta
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(WireToolCallDelta::into_delta)
                    .collect(),
                is_final: finish_reason.is_some(),
                finish_reason,
                usage: wire.usage,
            }
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(flatten)]
    extra: &'a HashMap<String, Value>,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a ChatRequest, stream: bool) -> Self {
        Self {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from_message).collect(),
            tools: request
                .tools
                .iter()
                .map(|function| WireTool {
                    kind: "function",
                    function,
                })
                .collect(),
            tool_choice: request.tool_choice.as_ref().map(tool_choice_value),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            n: request.n,
            stream,
            extra: &request.extra,
        }
    }
}

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Required => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Function(name) => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a FunctionDefinition,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_message(message: &ChatMessage) -> Self {
        let tool_calls = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });
        let content = if tool_calls.is_some() && message.content.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };

        Self {
            role: message.role,
            content,
            name: message.name.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }

    fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.unwrap_or_default(),
            name: self.name,
            tool_calls: self
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall::new(call.id, call.function.name, call.function.arguments))
                .collect(),
            tool_call_id: self.tool_call_id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

impl WireResponse {
    fn into_completion(self) -> ChatCompletion {
        let choices = self
            .choices
            .into_iter()
            .map(|choice| {
                let finish_reason = choice
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::from_wire)
                    .unwrap_or(FinishReason::Other);
                Choice::new(choice.index, choice.message.into_message(), finish_reason)
            })
            .collect();

        ChatCompletion {
            id: self.id,
            model: self.model,
            choices,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    index: u32,
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

impl WireToolCallDelta {
    fn into_delta(self) -> ToolCallDelta {
        let (name, arguments) = match self.function {
            Some(function) => (function.name, function.arguments.unwrap_or_default()),
            None => (None, String::new()),
        };
        ToolCallDelta {
            index: self.index,
            id: self.id,
            name,
            arguments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}
