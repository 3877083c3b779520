//! Typed schemas and LLM actor adapters for state-machine driven agents

mod builder;
pub mod spec;

pub use builder::{Agent, AgentBuilder};
pub use spec::{AgentSpec, ProviderKind, ProviderSpec};

pub mod actors {
    pub use stately_agent_actors::{
        ChatActor, ChatInput, ChatStream, ChatStreamActor, EventChoiceActor, EventChoiceOptions,
        OUTPUT_KEY, StatelyAgentAdapter, Tool, ToolChoiceActor, ToolChoiceOptions, ToolLogic,
        ToolPromise, ToolRegistry,
    };
    pub use stately_agent_core::{
        ActorScope, EventSink, FnLogic, PromiseLogic, StreamLogic, promise_fn,
    };
}

pub mod error {
    pub use stately_agent_core::{AgentError, Result, TransportError};
}

pub mod llm {
    pub use stately_agent_core::{
        ChatCompletion, ChatMessage, ChatRequest, Choice, ChunkStream, CompletionChunk,
        CompletionTransport, FinishReason, FunctionDefinition, Role, TokenUsage, ToolCall,
        ToolCallDelta, ToolChoice, TransportFeature,
    };

    pub mod providers {
        pub use stately_agent_llm::providers::sse::{SseDecoder, SseEvent};
        pub use stately_agent_llm::{OpenAiTransport, OpenAiTransportBuilder};
    }

    pub mod mock {
        pub use stately_agent_llm::{MockCall, MockChunk, MockTransport};
    }
}

pub mod schema {
    pub use stately_agent_schema::{
        CompiledSchema, EventSchema, EventSchemas, EventValidator, FieldDescriptor, FieldKind,
        FieldMap, SchemaBundle, SchemaSpec, SchemaTypes, TypedSchemas, build_schemas,
        build_schemas_from_values, generate_schema, normalize_event,
    };
}

pub use stately_agent_core::{AgentError, MachineEvent, Result};
