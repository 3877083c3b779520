use std::sync::Arc;
use tracing::{debug, warn};

use stately_agent_core::{
    ActorScope, AgentError, ChatCompletion, ChatRequest, CompletionTransport, Result,
};

use crate::chat::ChatActor;
use crate::event_choice::{EventChoiceActor, EventChoiceOptions};
use crate::registry::ToolRegistry;
use crate::stream::ChatStreamActor;
use crate::tool_choice::{ToolChoiceActor, ToolChoiceOptions};

/// What an actor's input function produces: a bare prompt or a full request.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatInput {
    Prompt(String),
    Request(ChatRequest),
}

impl From<String> for ChatInput {
    fn from(prompt: String) -> Self {
        ChatInput::Prompt(prompt)
    }
}

impl From<&str> for ChatInput {
    fn from(prompt: &str) -> Self {
        ChatInput::Prompt(prompt.to_string())
    }
}

impl From<ChatRequest> for ChatInput {
    fn from(request: ChatRequest) -> Self {
        ChatInput::Request(request)
    }
}

pub(crate) type InputFn<I> = Arc<dyn Fn(I) -> ChatInput + Send + Sync>;

fn input_fn<I, R, F>(f: F) -> InputFn<I>
where
    F: Fn(I) -> R + Send + Sync + 'static,
    R: Into<ChatInput>,
{
    Arc::new(move |input| f(input).into())
}

/// Builds actors that share one model and one completion transport.
#[derive(Clone)]
pub struct StatelyAgentAdapter {
    model: String,
    transport: Arc<dyn CompletionTransport>,
}

impl std::fmt::Debug for StatelyAgentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatelyAgentAdapter")
            .field("model", &self.model)
            .field("transport", &self.transport.provider_name())
            .finish()
    }
}

impl StatelyAgentAdapter {
    pub fn new(model: impl Into<String>, transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            model: model.into(),
            transport,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn transport(&self) -> &Arc<dyn CompletionTransport> {
        &self.transport
    }

    /// One-shot completion actor resolving with the full completion.
    pub fn from_chat<I, R, F>(&self, f: F) -> ChatActor<I>
    where
        F: Fn(I) -> R + Send + Sync + 'static,
        R: Into<ChatInput>,
    {
        ChatActor::new(self.clone(), input_fn(f))
    }

    /// Streaming completion actor producing chunks as they arrive.
    pub fn from_chat_stream<I, R, F>(&self, f: F) -> ChatStreamActor<I>
    where
        F: Fn(I) -> R + Send + Sync + 'static,
        R: Into<ChatInput>,
    {
        ChatStreamActor::new(self.clone(), input_fn(f))
    }

    /// Actor mapping each returned choice to a machine event.
    pub fn from_event_choice<I, R, F>(&self, f: F, options: EventChoiceOptions) -> EventChoiceActor<I>
    where
        F: Fn(I) -> R + Send + Sync + 'static,
        R: Into<ChatInput>,
    {
        EventChoiceActor::new(self.clone(), input_fn(f), options)
    }

    /// Actor letting the model pick among `tools`, running nested tool logic
    /// and producing one event per tool call.
    pub fn from_tool_choice<I, R, F>(
        &self,
        f: F,
        tools: ToolRegistry,
        options: ToolChoiceOptions,
    ) -> ToolChoiceActor<I>
    where
        F: Fn(I) -> R + Send + Sync + 'static,
        R: Into<ChatInput>,
    {
        ToolChoiceActor::new(self.clone(), input_fn(f), Arc::new(tools), options)
    }

    /// Turns actor input into a request. Requests without a model use the
    /// adapter's model.
    pub(crate) fn request(&self, input: ChatInput) -> ChatRequest {
        match input {
            ChatInput::Prompt(prompt) => ChatRequest::prompt(&self.model, prompt),
            ChatInput::Request(mut request) => {
                if request.model.is_empty() {
                    request.model = self.model.clone();
                }
                request
            }
        }
    }

    /// Issues a one-shot request, aborting it if the scope is cancelled.
    pub(crate) async fn complete(
        &self,
        request: &ChatRequest,
        scope: &ActorScope,
    ) -> Result<ChatCompletion> {
        debug!(
            actor = %scope.id(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Issuing completion request"
        );

        let completion = scope
            .run_until_cancelled(self.transport.complete(request))
            .await
            .inspect_err(|_| debug!(actor = %scope.id(), "Completion request aborted"))?
            .map_err(|err| {
                warn!(actor = %scope.id(), error = %err, "Completion request failed");
                AgentError::CompletionRequest(err)
            })?;

        debug!(
            actor = %scope.id(),
            id = %completion.id,
            choices = completion.choices.len(),
            "Completion resolved"
        );
        Ok(completion)
    }
}
