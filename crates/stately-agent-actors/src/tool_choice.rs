use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use stately_agent_core::{
    ActorScope, AgentError, ChatCompletion, ChatRequest, MachineEvent, PromiseLogic, Result,
    ToolChoice,
};

use crate::adapter::{InputFn, StatelyAgentAdapter};
use crate::event_choice::dispatch_all;
use crate::registry::{OUTPUT_KEY, ResolvedCall, ToolLogic, ToolRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolChoiceOptions {
    /// Dispatch produced events to the parent before resolving.
    #[serde(default = "default_execute")]
    pub execute: bool,
}

fn default_execute() -> bool {
    true
}

impl Default for ToolChoiceOptions {
    fn default() -> Self {
        Self { execute: true }
    }
}

impl ToolChoiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }
}

/// Actor that lets the model pick tools from a registry.
///
/// Every tool call in the response is matched and validated before anything
/// runs, so an unknown tool or bad arguments reject the actor with no nested
/// invocation and no dispatch. Nested promise logic then runs in order, each
/// in a child scope, and its result lands under `output` in the tool's event.
pub struct ToolChoiceActor<I> {
    adapter: StatelyAgentAdapter,
    input_fn: InputFn<I>,
    tools: Arc<ToolRegistry>,
    options: ToolChoiceOptions,
}

impl<I> ToolChoiceActor<I> {
    pub(crate) fn new(
        adapter: StatelyAgentAdapter,
        input_fn: InputFn<I>,
        tools: Arc<ToolRegistry>,
        options: ToolChoiceOptions,
    ) -> Self {
        Self {
            adapter,
            input_fn,
            tools,
            options,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    fn prepare(&self, input: I) -> ChatRequest {
        let mut request = self.adapter.request((self.input_fn)(input));
        for function in self.tools.function_definitions() {
            request.upsert_tool(function);
        }
        if request.tool_choice.is_none() && !self.tools.is_empty() {
            request.tool_choice = Some(ToolChoice::Required);
        }
        request
    }

    fn resolve_calls<'a>(&'a self, completion: &ChatCompletion) -> Result<Vec<ResolvedCall<'a>>> {
        let mut resolved = Vec::new();
        for choice in &completion.choices {
            if choice.message.tool_calls.is_empty() {
                return Err(AgentError::event_mapping(
                    choice.index as usize,
                    "choice carries no tool call",
                ));
            }
            for call in &choice.message.tool_calls {
                resolved.push(self.tools.resolve(call).inspect_err(|err| {
                    warn!(tool = %call.name, error = %err, "Rejected tool call");
                })?);
            }
        }
        Ok(resolved)
    }

    async fn run(&self, call: ResolvedCall<'_>, scope: &ActorScope) -> Result<MachineEvent> {
        let ResolvedCall {
            name,
            tool,
            arguments,
            mut event,
        } = call;

        match tool.logic() {
            ToolLogic::Promise(logic) => {
                debug!(actor = %scope.id(), tool = %name, "Invoking tool");
                let child = scope.child(name);
                let output = scope
                    .run_until_cancelled(logic.invoke(arguments, child))
                    .await?
                    .map_err(|err| match err {
                        AgentError::Cancelled => err,
                        err => AgentError::ToolExecution {
                            tool: name.to_string(),
                            source: Box::new(err),
                        },
                    })?;
                event.payload.insert(OUTPUT_KEY.to_string(), output);
            }
            ToolLogic::External(actor) => {
                debug!(actor = %scope.id(), tool = %name, target = %actor, "Tool left to executor");
            }
        }
        Ok(event)
    }
}

impl<I> Clone for ToolChoiceActor<I> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            input_fn: self.input_fn.clone(),
            tools: self.tools.clone(),
            options: self.options.clone(),
        }
    }
}

#[async_trait]
impl<I: Send + 'static> PromiseLogic<I> for ToolChoiceActor<I> {
    type Output = Option<Vec<MachineEvent>>;

    async fn invoke(&self, input: I, scope: ActorScope) -> Result<Self::Output> {
        let request = self.prepare(input);
        let completion = self.adapter.complete(&request, &scope).await?;

        if completion.choices.is_empty() {
            debug!(actor = %scope.id(), "Completion returned no choices");
            return Ok(None);
        }

        let calls = self.resolve_calls(&completion)?;
        let mut events = Vec::with_capacity(calls.len());
        for call in calls {
            events.push(self.run(call, &scope).await?);
        }

        if self.options.execute {
            dispatch_all(&scope, &events)?;
        }
        Ok(Some(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use stately_agent_core::{Choice, ChatMessage, ToolCall, promise_fn};
    use stately_agent_llm::MockTransport;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    use crate::registry::Tool;

    fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn search_tool(invocations: Arc<AtomicUsize>) -> Tool {
        Tool::promise(
            "Search the knowledge base",
            promise_fn(move |args: Value, _scope: ActorScope| {
                let invocations = invocations.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    let query = args["query"].as_str().unwrap_or_default().to_string();
                    Ok::<_, AgentError>(json!({ "hits": [format!("result for {query}")] }))
                }
            }),
            query_schema(),
        )
    }

    fn setup(choices: Vec<Choice>) -> (MockTransport, StatelyAgentAdapter) {
        let mut mock = MockTransport::new("test");
        mock.add_choices(choices);
        let adapter = StatelyAgentAdapter::new("gpt-4o-mini", Arc::new(mock.clone()));
        (mock, adapter)
    }

    fn registry(invocations: &Arc<AtomicUsize>) -> ToolRegistry {
        ToolRegistry::from_tools([("search", search_tool(invocations.clone()))]).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MachineEvent>) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_unknown_tool_rejects_without_dispatch() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (_mock, adapter) = setup(vec![Choice::tool_call(
            0,
            ToolCall::new("c1", "lookup", r#"{"query": "rust"}"#),
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        let err = adapter
            .from_tool_choice(|p: &'static str| p, registry(&invocations), ToolChoiceOptions::default())
            .invoke("Find it", scope)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::UnknownTool(name) if name == "lookup"));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_any_invalid_call_prevents_all_invocations() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (_mock, adapter) = setup(vec![Choice::new(
            0,
            ChatMessage::assistant_tool_calls(vec![
                ToolCall::new("c1", "search", r#"{"query": "rust"}"#),
                ToolCall::new("c2", "search", r#"{"query": 7}"#),
            ]),
            stately_agent_core::FinishReason::ToolCall,
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        let err = adapter
            .from_tool_choice(|p: &'static str| p, registry(&invocations), ToolChoiceOptions::default())
            .invoke("Find it", scope)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidToolInput { ref tool, .. } if tool == "search"));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_runs_tools_and_dispatches_in_order() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let tools = registry(&invocations)
            .with_tool(
                "escalate",
                Tool::external("Hand over to a human", "humanAgent", json!({"type": "object"})),
            )
            .unwrap();
        let (mock, adapter) = setup(vec![
            Choice::tool_call(0, ToolCall::new("c1", "search", r#"{"query": "rust"}"#)),
            Choice::tool_call(1, ToolCall::new("c2", "escalate", "")),
        ]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        let events = adapter
            .from_tool_choice(|p: &'static str| p, tools, ToolChoiceOptions::default())
            .invoke("Find it", scope)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            events,
            vec![
                MachineEvent::new("search")
                    .with("query", "rust")
                    .with(OUTPUT_KEY, json!({"hits": ["result for rust"]})),
                MachineEvent::new("escalate"),
            ]
        );
        assert_eq!(drain(&mut rx), events);
        assert_eq!(invocations.load(Ordering::SeqCst), 1);

        let request = mock.last_request().unwrap();
        assert_eq!(request.tool_choice, Some(ToolChoice::Required));
        let names: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search", "escalate"]);
    }

    #[tokio::test]
    async fn test_execute_false_still_runs_tools() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (_mock, adapter) = setup(vec![Choice::tool_call(
            0,
            ToolCall::new("c1", "search", r#"{"query": "rust"}"#),
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        let events = adapter
            .from_tool_choice(
                |p: &'static str| p,
                registry(&invocations),
                ToolChoiceOptions::new().with_execute(false),
            )
            .invoke("Find it", scope)
            .await
            .unwrap()
            .unwrap();

        assert!(events[0].get(OUTPUT_KEY).is_some());
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_nested_failure_is_tool_execution_error() {
        let failing = Tool::promise(
            "Always fails",
            promise_fn(|_args: Value, _scope: ActorScope| async move {
                Err::<Value, _>(AgentError::Other("index offline".into()))
            }),
            json!({"type": "object"}),
        );
        let tools = ToolRegistry::from_tools([("broken", failing)]).unwrap();
        let (_mock, adapter) = setup(vec![Choice::tool_call(
            0,
            ToolCall::new("c1", "broken", "{}"),
        )]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        let err = adapter
            .from_tool_choice(|p: &'static str| p, tools, ToolChoiceOptions::default())
            .invoke("Go", scope)
            .await
            .unwrap_err();

        match err {
            AgentError::ToolExecution { tool, source } => {
                assert_eq!(tool, "broken");
                assert!(source.to_string().contains("index offline"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_nested_logic_sees_child_scope() {
        let seen: Arc<Mutex<Option<(String, bool)>>> = Arc::default();
        let recorder = {
            let seen = seen.clone();
            Tool::promise(
                "Records its scope",
                promise_fn(move |_args: Value, scope: ActorScope| {
                    let seen = seen.clone();
                    async move {
                        *seen.lock().unwrap() = Some((scope.id().to_string(), scope.has_parent()));
                        Ok::<_, AgentError>(Value::Null)
                    }
                }),
                json!({"type": "object"}),
            )
        };
        let tools = ToolRegistry::from_tools([("record", recorder)]).unwrap();
        let (_mock, adapter) = setup(vec![Choice::tool_call(0, ToolCall::new("c1", "record", "{}"))]);
        let (tx, _rx) = mpsc::unbounded_channel();
        let scope = ActorScope::new("tools").with_parent_sink(tx);

        adapter
            .from_tool_choice(|p: &'static str| p, tools, ToolChoiceOptions::default())
            .invoke("Go", scope)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(("tools/record".to_string(), false)));
    }

    #[tokio::test]
    async fn test_choice_without_tool_call() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (_mock, adapter) = setup(vec![Choice::text(0, "No tool needed")]);

        let err = adapter
            .from_tool_choice(|p: &'static str| p, registry(&invocations), ToolChoiceOptions::default())
            .invoke("Hi", ActorScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::EventMapping { index: 0, .. }));
    }

    #[tokio::test]
    async fn test_no_choices_resolves_none() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let (_mock, adapter) = setup(Vec::new());

        let result = adapter
            .from_tool_choice(|p: &'static str| p, registry(&invocations), ToolChoiceOptions::default())
            .invoke("Hi", ActorScope::detached())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_options_deserialize() {
        let options: ToolChoiceOptions = serde_json::from_value(json!({})).unwrap();
        assert!(options.execute);
        let options: ToolChoiceOptions = serde_json::from_value(json!({"execute": false})).unwrap();
        assert!(!options.execute);
    }
}
