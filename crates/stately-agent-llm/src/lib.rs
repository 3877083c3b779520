//! Completion transports for stately agents

pub mod mock;
pub mod providers;

pub use mock::{MockCall, MockChunk, MockTransport};
pub use providers::{OpenAiTransport, OpenAiTransportBuilder};
pub use stately_agent_core::{
    ChatCompletion, ChatMessage, ChatRequest, Choice, ChunkStream, CompletionChunk,
    CompletionTransport, FinishReason, Role, TokenUsage, ToolCall, TransportError,
    TransportFeature,
};
