use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use stately_agent_actors::{
    ActorScope, EventChoiceOptions, MachineEvent, PromiseLogic, StatelyAgentAdapter, Tool,
    ToolChoiceOptions, ToolRegistry, promise_fn,
};
use stately_agent_core::{AgentError, ChatMessage, ChatRequest, Choice, ToolCall};
use stately_agent_llm::MockTransport;
use stately_agent_schema::SchemaSpec;

const QUIZ_SCHEMAS: &str = r#"
context:
  score:
    type: number
  lastAnswer:
    type: string
events:
  submit:
    type: object
    description: Submit an answer to the current question
    properties:
      answer:
        type: string
  giveUp:
    type: object
    description: Stop playing
"#;

#[derive(Debug, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
struct QuizContext {
    score: f64,
    last_answer: String,
}

#[derive(Debug, Deserialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
enum QuizEvent {
    Submit { answer: String },
    GiveUp,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_event_choice_drives_typed_machine() {
    init_tracing();

    let bundle = SchemaSpec::from_yaml(QUIZ_SCHEMAS).unwrap().build().unwrap();
    assert_eq!(bundle.context["required"], json!(["score", "lastAnswer"]));

    let typed = bundle.clone().pair::<QuizContext, QuizEvent>().unwrap();
    let validator = bundle.events.validator().unwrap();

    let mut mock = MockTransport::new("quiz");
    mock.add_choices(vec![Choice::tool_call(
        0,
        ToolCall::new("call_1", "submit", r#"{"answer": "Paris"}"#),
    )]);
    let adapter = StatelyAgentAdapter::new("gpt-4o-mini", Arc::new(mock.clone()));

    let actor = adapter.from_event_choice(
        |question: String| {
            ChatRequest::new("")
                .with_message(ChatMessage::system("Answer with exactly one event."))
                .with_message(ChatMessage::user(question))
        },
        EventChoiceOptions::new().with_events(validator),
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scope = ActorScope::new("quiz.asking").with_parent_sink(tx);
    let resolved = actor
        .invoke("What is the capital of France?".to_string(), scope)
        .await
        .unwrap()
        .unwrap();

    let mut context = typed
        .decode_context(json!({"score": 0, "lastAnswer": ""}))
        .unwrap();
    while let Ok(event) = rx.try_recv() {
        match typed.decode_event(&event).unwrap() {
            QuizEvent::Submit { answer } => {
                context.score += 1.0;
                context.last_answer = answer;
            }
            QuizEvent::GiveUp => unreachable!("model submitted an answer"),
        }
    }

    assert_eq!(resolved, vec![MachineEvent::new("submit").with("answer", "Paris")]);
    assert_eq!(
        context,
        QuizContext {
            score: 1.0,
            last_answer: "Paris".into()
        }
    );

    let request = mock.last_request().unwrap();
    assert_eq!(request.model, "gpt-4o-mini");
    assert_eq!(request.tools.len(), 2);
}

#[tokio::test]
async fn test_tool_choice_with_nested_actor() {
    init_tracing();

    let hint = Tool::promise(
        "Look up a hint for the current question",
        promise_fn(|args: Value, _scope: ActorScope| async move {
            let topic = args["topic"].as_str().unwrap_or_default().to_string();
            Ok::<_, AgentError>(json!(format!("Think about {topic} landmarks")))
        }),
        json!({
            "type": "object",
            "properties": { "topic": { "type": "string" } },
            "required": ["topic"],
            "additionalProperties": false
        }),
    );
    let tools = ToolRegistry::new().with_tool("hint", hint).unwrap();

    let mut mock = MockTransport::new("quiz");
    mock.add_choices(vec![Choice::tool_call(
        0,
        ToolCall::new("call_1", "hint", r#"{"topic": "French"}"#),
    )]);
    mock.add_choices(vec![Choice::tool_call(
        0,
        ToolCall::new("call_2", "lookup", "{}"),
    )]);
    let adapter = StatelyAgentAdapter::new("gpt-4o-mini", Arc::new(mock.clone()));
    let actor = adapter.from_tool_choice(|p: &'static str| p, tools, ToolChoiceOptions::default());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let scope = ActorScope::new("quiz.hinting").with_parent_sink(tx);

    actor.invoke("I need help", scope.clone()).await.unwrap();
    let event = rx.try_recv().unwrap();
    assert_eq!(event.event_type, "hint");
    assert_eq!(event.get("output"), Some(&json!("Think about French landmarks")));

    let err = actor.invoke("More help", scope).await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownTool(name) if name == "lookup"));
    assert!(rx.try_recv().is_err());
    assert_eq!(mock.call_count(), 2);
}
