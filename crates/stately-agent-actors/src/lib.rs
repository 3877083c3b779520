//! Actor adapters that bind completion calls to state-machine actors
//!
//! A [`StatelyAgentAdapter`] holds one model identifier and one shared
//! completion transport, and builds four kinds of actors from it:
//!
//! - [`ChatActor`]: one-shot completion resolving with the full result
//! - [`ChatStreamActor`]: lazy stream of completion chunks ([`StreamLogic`])
//! - [`EventChoiceActor`]: choices mapped to machine events and dispatched
//! - [`ToolChoiceActor`]: model-selected tools run from a [`ToolRegistry`]

mod adapter;
mod chat;
mod event_choice;
mod registry;
mod stream;
mod tool_choice;

pub use adapter::{ChatInput, StatelyAgentAdapter};
pub use chat::ChatActor;
pub use event_choice::{EventChoiceActor, EventChoiceOptions};
pub use registry::{OUTPUT_KEY, Tool, ToolLogic, ToolPromise, ToolRegistry};
pub use stream::{ChatStream, ChatStreamActor};
pub use tool_choice::{ToolChoiceActor, ToolChoiceOptions};

pub use stately_agent_core::{
    ActorScope, EventSink, MachineEvent, PromiseLogic, StreamLogic, promise_fn,
};
