use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use stately_agent_core::{
    ActorScope, AgentError, ChatCompletion, ChatRequest, Choice, MachineEvent, PromiseLogic,
    Result, ToolChoice,
};
use stately_agent_schema::EventValidator;

use crate::adapter::{InputFn, StatelyAgentAdapter};

#[derive(Debug, Clone)]
pub struct EventChoiceOptions {
    /// Dispatch produced events to the parent before resolving.
    pub execute: bool,
    /// Declared events offered to the model and checked on the way back.
    pub events: Option<Arc<EventValidator>>,
}

impl Default for EventChoiceOptions {
    fn default() -> Self {
        Self {
            execute: true,
            events: None,
        }
    }
}

impl EventChoiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_events(mut self, events: EventValidator) -> Self {
        self.events = Some(Arc::new(events));
        self
    }
}

/// Actor that maps each completion choice to one machine event.
pub struct EventChoiceActor<I> {
    adapter: StatelyAgentAdapter,
    input_fn: InputFn<I>,
    options: EventChoiceOptions,
}

impl<I> EventChoiceActor<I> {
    pub(crate) fn new(
        adapter: StatelyAgentAdapter,
        input_fn: InputFn<I>,
        options: EventChoiceOptions,
    ) -> Self {
        Self {
            adapter,
            input_fn,
            options,
        }
    }

    pub fn options(&self) -> &EventChoiceOptions {
        &self.options
    }

    fn prepare(&self, input: I) -> ChatRequest {
        let mut request = self.adapter.request((self.input_fn)(input));
        if let Some(events) = &self.options.events {
            for function in events.schemas().function_definitions() {
                request.upsert_tool(function);
            }
            if request.tool_choice.is_none() {
                request.tool_choice = Some(ToolChoice::Required);
            }
        }
        request
    }
}

impl<I> Clone for EventChoiceActor<I> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            input_fn: self.input_fn.clone(),
            options: self.options.clone(),
        }
    }
}

#[async_trait]
impl<I: Send + 'static> PromiseLogic<I> for EventChoiceActor<I> {
    type Output = Option<Vec<MachineEvent>>;

    async fn invoke(&self, input: I, scope: ActorScope) -> Result<Self::Output> {
        let request = self.prepare(input);
        let completion = self.adapter.complete(&request, &scope).await?;

        let Some(events) = map_choices(&completion, self.options.events.as_deref())? else {
            debug!(actor = %scope.id(), "Completion returned no choices");
            return Ok(None);
        };

        if self.options.execute {
            dispatch_all(&scope, &events)?;
        }
        Ok(Some(events))
    }
}

/// Maps every choice to an event, in response order. `None` when there are no
/// choices at all.
pub(crate) fn map_choices(
    completion: &ChatCompletion,
    validator: Option<&EventValidator>,
) -> Result<Option<Vec<MachineEvent>>> {
    if completion.choices.is_empty() {
        return Ok(None);
    }
    completion
        .choices
        .iter()
        .map(|choice| map_choice(choice, validator))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn map_choice(choice: &Choice, validator: Option<&EventValidator>) -> Result<MachineEvent> {
    let index = choice.index as usize;
    let call = match choice.message.tool_calls.as_slice() {
        [] => return Err(AgentError::event_mapping(index, "choice carries no function call")),
        [call] => call,
        calls => {
            // One choice maps to exactly one event
            let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
            warn!(choice = index, calls = ?names, "Choice carries parallel function calls");
            return Err(AgentError::event_mapping(
                index,
                format!("choice carries {} function calls: {}", calls.len(), names.join(", ")),
            ));
        }
    };

    let arguments = call.parse_arguments().map_err(|err| {
        AgentError::event_mapping(
            index,
            format!("arguments of '{}' are not valid JSON: {}", call.name, err),
        )
    })?;
    let event = MachineEvent::from_payload(&call.name, arguments)
        .map_err(|err| AgentError::event_mapping(index, err.to_string()))?;

    if let Some(validator) = validator {
        validator
            .check(&event)
            .map_err(|reason| AgentError::event_mapping(index, reason))?;
    }
    Ok(event)
}

/// Hands events to the parent in order. Stops at the first refusal, which only
/// happens once the scope is cancelled.
pub(crate) fn dispatch_all(scope: &ActorScope, events: &[MachineEvent]) -> Result<()> {
    for event in events {
        scope.dispatch(event.clone())?;
    }
    info!(actor = %scope.id(), count = events.len(), "Dispatched events");
    Ok(())
}
