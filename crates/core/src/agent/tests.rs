use std::future::ready;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chainlet_model::{ErrorKind, ModelMessage, ModelProviderError, ToolCallRequest};
use chainlet_test_model::{PresetEvent, PresetResponse, TestModelProvider};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::tool::{Approval, Tool, ToolResult};
use crate::{
    AgentBuilder, AgentError, AgentKind, AgentStage, EarlyStopping, RetryPolicy,
    STOPPED_OUTPUT, TranscriptSource,
};

#[derive(Deserialize)]
struct EchoInput {
    text: String,
}

struct EchoTool;

impl Tool for EchoTool {
    type Input = EchoInput;

    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Repeats the given text."
    }

    fn parameter_schema(&self) -> &Value {
        static SCHEMA: std::sync::LazyLock<Value> = std::sync::LazyLock::new(|| {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        });
        &SCHEMA
    }

    fn make_approval(&self, input: &Self::Input) -> Option<Approval> {
        Some(Approval::new(format!("echo {}", input.text), "test"))
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(Ok(input.text.to_uppercase()))
    }
}

fn tool_call(id: &str, name: &str, arguments: Value) -> PresetEvent {
    PresetEvent::ToolCall(ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    })
}

#[tokio::test]
async fn test_simple_message() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Hi, ".to_owned()),
        PresetEvent::MessageDelta("what can I do for you?".to_owned()),
    ]));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let output = agent.run("Hello").await.unwrap();
    assert_eq!(output.output, "Hi, what can I do for you?");
    assert!(output.intermediate_steps.is_empty());
    assert_eq!(agent.stage(), AgentStage::Idle);
    assert_eq!(
        agent.conversation().export_transcript(),
        "user: Hello\n\nassistant: Hi, what can I do for you?"
    );
}

#[tokio::test]
async fn test_tool_calling_loop() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Let me check.".to_owned()),
        tool_call("call_1", "echo", json!({ "text": "ping" })),
        tool_call("call_2", "search", json!({ "query": "pong" })),
    ]));
    model_provider.push_response(PresetResponse::with_text("It says PING."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_system_prompt("You are terse.")
        .with_tool(EchoTool)
        .build();
    let output = agent.run("Echo ping").await.unwrap();
    assert_eq!(output.output, "It says PING.");

    let steps = &output.intermediate_steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].action.tool, "echo");
    assert_eq!(steps[0].action.log, "Let me check.");
    assert_eq!(steps[0].observation, "PING");
    assert_eq!(steps[1].action.tool, "search");
    assert_eq!(
        steps[1].observation,
        "Error: `search` is not a valid tool, try another one."
    );

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "echo");
    let messages = &requests[1].messages;
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0], ModelMessage::System("You are terse.".to_owned()));
    assert_eq!(messages[1], ModelMessage::User("Echo ping".to_owned()));
    let ModelMessage::Opaque(opaque) = &messages[2] else {
        panic!("expected an opaque turn");
    };
    let Some(ModelMessage::AssistantToolCalls {
        content,
        tool_calls,
    }) = opaque.neutral()
    else {
        panic!("expected a neutral tool call turn");
    };
    assert_eq!(content, "Let me check.");
    assert_eq!(tool_calls.len(), 2);
    let ModelMessage::Tool(result) = &messages[3] else {
        panic!("expected a tool result");
    };
    assert_eq!((result.id.as_str(), result.content.as_str()), ("call_1", "PING"));
    let ModelMessage::Tool(result) = &messages[4] else {
        panic!("expected a tool result");
    };
    assert_eq!(result.id, "call_2");
}

#[tokio::test]
async fn test_conversation_persists_across_runs() {
    let mut model_provider = TestModelProvider::default();
    model_provider.set_opaque_messages(false);
    model_provider.push_response(PresetResponse::with_events([tool_call(
        "call_1",
        "echo",
        json!({ "text": "a" }),
    )]));
    model_provider.push_response(PresetResponse::with_text("A"));
    model_provider.push_response(PresetResponse::with_text("Still A."));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .build();
    agent.run("Echo a").await.unwrap();
    agent.run("And again?").await.unwrap();

    let requests = model_provider.requests();
    let messages = &requests[2].messages;
    assert_eq!(messages.len(), 5);
    assert_eq!(
        messages[1],
        ModelMessage::AssistantToolCalls {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: "call_1".to_owned(),
                name: "echo".to_owned(),
                arguments: json!({ "text": "a" }),
            }],
        }
    );
    assert_eq!(messages[3], ModelMessage::Assistant("A".to_owned()));
    assert_eq!(messages[4], ModelMessage::User("And again?".to_owned()));

    agent.clear_conversation().unwrap();
    assert!(agent.conversation().is_empty());
}

#[tokio::test]
async fn test_cancelled_tool_round_is_not_recorded() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([tool_call(
        "call_1",
        "echo",
        json!({ "text": "files" }),
    )]));
    model_provider.push_response(PresetResponse::with_text("Hello."));

    // Approvals are held and never answered, so the tool round never ends.
    let pending = Arc::new(Mutex::new(vec![]));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .on_tool_call_request({
            let pending = Arc::clone(&pending);
            move |approval| pending.lock().unwrap().push(approval)
        })
        .build();
    let cancelled = tokio::time::timeout(Duration::from_millis(50), agent.run("list files")).await;
    assert!(cancelled.is_err());
    assert_eq!(pending.lock().unwrap().len(), 1);
    assert_eq!(agent.stage(), AgentStage::Idle);
    assert_eq!(agent.conversation().len(), 1);

    let output = agent.run("hello again").await.unwrap();
    assert_eq!(output.output, "Hello.");
    let requests = model_provider.requests();
    assert_eq!(
        requests[1].messages,
        [
            ModelMessage::User("list files".to_owned()),
            ModelMessage::User("hello again".to_owned()),
        ]
    );
}

fn looping_provider(times: usize) -> TestModelProvider {
    let model_provider = TestModelProvider::default();
    for i in 0..times {
        model_provider.push_response(PresetResponse::with_events([tool_call(
            &format!("call_{i}"),
            "echo",
            json!({ "text": "again" }),
        )]));
    }
    model_provider
}

#[tokio::test]
async fn test_max_iterations_force() {
    let model_provider = looping_provider(5);
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .with_max_iterations(Some(2))
        .build();
    let output = agent.run("Loop").await.unwrap();
    assert_eq!(output.output, STOPPED_OUTPUT);
    assert_eq!(output.intermediate_steps.len(), 2);
    assert_eq!(model_provider.requests().len(), 2);
}

#[tokio::test]
async fn test_max_iterations_generate() {
    let model_provider = looping_provider(1);
    model_provider.push_response(PresetResponse::with_text(
        "I now know the final answer\nFinal Answer: AGAIN",
    ));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_tool(EchoTool)
        .with_max_iterations(Some(1))
        .with_early_stopping(EarlyStopping::Generate)
        .build();
    let output = agent.run("Loop").await.unwrap();
    assert_eq!(output.output, "AGAIN");

    let requests = model_provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].tools.is_empty());
    assert_eq!(
        requests[1].messages.last(),
        Some(&ModelMessage::User(
            "I now need to return a final answer based on the previous steps:".to_owned()
        ))
    );
}

#[tokio::test]
async fn test_react_flow() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_text(
        " I should echo it.\nAction: echo\nAction Input: {\"text\": \"pong\"}\nObservation: made up",
    ));
    model_provider.push_response(PresetResponse::with_text(
        " I now know the final answer\nFinal Answer: PONG",
    ));

    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_kind(AgentKind::ZeroShotReact)
        .with_tool(EchoTool)
        .build();
    let output = agent.run("Echo pong").await.unwrap();
    assert_eq!(output.output, "PONG");
    assert_eq!(output.intermediate_steps.len(), 1);
    let step = &output.intermediate_steps[0];
    assert_eq!(step.action.tool, "echo");
    assert_eq!(step.action.tool_input, json!({ "text": "pong" }));
    assert_eq!(step.observation, "PONG");

    let requests = model_provider.requests();
    assert_eq!(requests[0].stop, ["\nObservation:"]);
    assert!(requests[0].tools.is_empty());
    let [ModelMessage::User(prompt)] = requests[1].messages.as_slice() else {
        panic!("expected a single prompt");
    };
    assert!(prompt.contains("echo: Repeats the given text."));
    assert!(prompt.ends_with(
        "Question: Echo pong\nThought: I should echo it.\nAction: echo\n\
         Action Input: {\"text\": \"pong\"}\nObservation: PONG\nThought:"
    ));
}

#[tokio::test]
async fn test_react_parse_errors() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_text("I am confused."));
    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_kind(AgentKind::ZeroShotReact)
        .build();
    let err = agent.run("Anything").await.unwrap_err();
    assert!(matches!(err, AgentError::OutputParse(text) if text == "I am confused."));

    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_text("I am confused."));
    model_provider.push_response(PresetResponse::with_text("Final Answer: fine"));
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_kind(AgentKind::ZeroShotReact)
        .with_handle_parsing_errors(true)
        .build();
    let output = agent.run("Anything").await.unwrap();
    assert_eq!(output.output, "fine");
    assert_eq!(output.intermediate_steps[0].action.tool, "_Exception");
    assert_eq!(
        output.intermediate_steps[0].observation,
        "Invalid or incomplete response"
    );
}

#[tokio::test]
async fn test_busy_while_running() {
    let mut model_provider = TestModelProvider::default();
    model_provider.set_delay(Duration::from_millis(200));
    model_provider.push_response(PresetResponse::with_text("slow"));

    let agent = AgentBuilder::with_model_provider(model_provider).build();
    let running = tokio::spawn({
        let agent = agent.clone();
        async move { agent.run("Hi").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.stage(), AgentStage::ModelThinking);
    assert!(matches!(agent.run("Again").await, Err(AgentError::Busy)));

    assert_eq!(running.await.unwrap().unwrap().output, "slow");
    assert_eq!(agent.stage(), AgentStage::Idle);
}

#[tokio::test]
async fn test_model_errors_and_retries() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_text("ok").with_failures(1));
    let fast = RetryPolicy {
        max_retries: 2,
        initial_interval: Duration::from_millis(1),
    };
    let agent = AgentBuilder::with_model_provider(model_provider.clone())
        .with_retry_policy(fast)
        .build();
    assert_eq!(agent.run("Hi").await.unwrap().output, "ok");
    assert_eq!(model_provider.requests().len(), 2);

    let err = agent.run("Hi").await.unwrap_err();
    let AgentError::Model(err) = err else {
        panic!("expected a model error");
    };
    assert_eq!(err.kind(), ErrorKind::Other);
}

#[tokio::test]
async fn test_callbacks_and_approval() {
    let model_provider = TestModelProvider::default();
    model_provider.push_response(PresetResponse::with_events([
        PresetEvent::MessageDelta("Trying.".to_owned()),
        tool_call("call_1", "echo", json!({ "text": "secret" })),
    ]));
    model_provider.push_response(PresetResponse::with_text("Denied."));

    let transcripts = Arc::new(Mutex::new(vec![]));
    let deltas = Arc::new(Mutex::new(String::new()));
    let steps = Arc::new(Mutex::new(vec![]));
    let agent = AgentBuilder::with_model_provider(model_provider)
        .with_tool(EchoTool)
        .on_transcript({
            let transcripts = Arc::clone(&transcripts);
            move |text, source| {
                transcripts.lock().unwrap().push((source, text.to_owned()));
            }
        })
        .on_message_delta({
            let deltas = Arc::clone(&deltas);
            move |delta| deltas.lock().unwrap().push_str(delta)
        })
        .on_step({
            let steps = Arc::clone(&steps);
            move |step| steps.lock().unwrap().push(step.observation.clone())
        })
        .on_tool_call_request(|approval| {
            assert_eq!(approval.what(), "echo secret");
            approval.reject(Some("no secrets".to_owned()));
        })
        .build();
    agent.run("Echo secret").await.unwrap();

    assert_eq!(*deltas.lock().unwrap(), "Trying.Denied.");
    assert_eq!(*steps.lock().unwrap(), ["Error: no secrets"]);
    let transcripts = transcripts.lock().unwrap();
    let sources: Vec<_> = transcripts.iter().map(|(source, _)| *source).collect();
    assert_eq!(
        sources,
        [
            TranscriptSource::User,
            TranscriptSource::Assistant,
            TranscriptSource::Tool,
            TranscriptSource::Assistant,
        ]
    );
}
