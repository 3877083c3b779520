//! Core types and traits for state-machine driven LLM agents

pub mod completion;
pub mod error;
pub mod event;
pub mod message;
pub mod traits;

pub use completion::{
    ChatCompletion, ChatRequest, Choice, CompletionChunk, FUNCTION_NAME_PATTERN, FinishReason,
    FunctionDefinition, TokenUsage, ToolCallDelta, ToolChoice,
};
pub use error::{AgentError, Result};
pub use event::MachineEvent;
pub use message::{ChatMessage, Role, ToolCall};
pub use traits::actor::{ActorScope, EventSink, FnLogic, PromiseLogic, StreamLogic, promise_fn};
pub use traits::transport::{ChunkStream, CompletionTransport, TransportError, TransportFeature};
