use super::*;
use crate::core::chat_stream::{CompletionStream, StreamEvent};
use crate::core::tool_call::ToolCallFragment;
use crate::core::tools::{Tool, ToolTable};
use serde_json::json;
use std::collections::VecDeque;
use std::fs;
use std::sync::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Replays one scripted list of events per request and records the
/// messages each request was opened with.
#[derive(Default)]
struct ScriptedClient {
    responses: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClient {
    fn new(responses: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedClient {
    fn stream(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> CompletionStream {
        self.requests.lock().unwrap().push(messages.to_vec());
        let (tx, rx) = mpsc::unbounded_channel();
        let events = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected extra request");
        for event in events {
            tx.send(event).unwrap();
        }
        CompletionStream::new(rx, cancel)
    }
}

/// Terminal stand-in that interrupts the turn as soon as `trigger` has been
/// displayed.
struct InterruptingOutput {
    written: Vec<u8>,
    trigger: &'static str,
    cancel: CancellationToken,
}

impl Write for InterruptingOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        if String::from_utf8_lossy(&self.written).contains(self.trigger) {
            self.cancel.cancel();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct StaticTool(&'static str);

#[async_trait::async_trait]
impl Tool for StaticTool {
    async fn invoke(&self, _arguments: &str) -> Result<String, ToolError> {
        Ok(self.0.to_string())
    }
}

struct FailingTool;

#[async_trait::async_trait]
impl Tool for FailingTool {
    async fn invoke(&self, _arguments: &str) -> Result<String, ToolError> {
        Err(ToolError::Failed {
            tool: "broken".to_string(),
            detail: "exit status 2".to_string(),
        })
    }
}

fn definition(name: &str) -> ToolDefinition {
    serde_json::from_value(json!({
        "name": name,
        "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
    }))
    .expect("definition should parse")
}

fn content(text: &str) -> StreamEvent {
    StreamEvent::Content(text.to_string())
}

fn named_call(name: &str) -> StreamEvent {
    StreamEvent::ToolCall(ToolCallFragment {
        name: Some(name.to_string()),
        arguments: None,
    })
}

fn call_arguments(arguments: &str) -> StreamEvent {
    StreamEvent::ToolCall(ToolCallFragment {
        name: None,
        arguments: Some(arguments.to_string()),
    })
}

fn finished(reason: FinishReason) -> StreamEvent {
    StreamEvent::Finished(reason)
}

fn setup() -> (TempDir, TranscriptStore) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let store = TranscriptStore::new(temp_dir.path());
    store
        .append(Destination::Conversation, &Message::user("Hi"))
        .expect("append failed");
    (temp_dir, store)
}

fn raw_log(store: &TranscriptStore) -> String {
    fs::read_to_string(store.path(Destination::Conversation)).expect("log should exist")
}

#[tokio::test]
async fn streamed_reply_is_persisted_and_echoed() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        content("Hel"),
        content("lo"),
        finished(FinishReason::Stop),
    ]]);
    let tools = ToolTable::new();
    let messages = store.messages(Destination::Conversation).unwrap();

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let outcome = conversation
        .run_turn(messages, &CancellationToken::new())
        .await
        .expect("turn should succeed");

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            response: "Hello".to_string()
        }
    );
    assert_eq!(
        String::from_utf8(conversation.into_output()).unwrap(),
        "Hello\n"
    );
    assert_eq!(raw_log(&store), "# user:\nHi\n\n# assistant:\nHello\n\n");
    assert_eq!(
        store.read_log(Destination::Conversation).unwrap(),
        vec![Message::user("Hi"), Message::assistant("Hello")]
    );
}

#[tokio::test]
async fn interrupt_keeps_flushed_prefix_without_padding() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        content("Hel"),
        content("lo"),
        finished(FinishReason::Stop),
    ]]);
    let tools = ToolTable::new();
    let cancel = CancellationToken::new();
    let output = InterruptingOutput {
        written: Vec::new(),
        trigger: "Hel",
        cancel: cancel.clone(),
    };

    let mut conversation =
        Conversation::new(&client, &tools, &store, Destination::Conversation, output);
    let outcome = conversation
        .run_turn(store.messages(Destination::Conversation).unwrap(), &cancel)
        .await
        .expect("abort is not an error");

    assert!(outcome.is_aborted());
    assert_eq!(outcome.response(), "Hel");
    assert_eq!(raw_log(&store), "# user:\nHi\n\n# assistant:\nHel");

    let shown = String::from_utf8(conversation.into_output().written).unwrap();
    assert_eq!(shown, format!("Hel\n{ABORT_NOTICE}\n"));
}

#[tokio::test]
async fn tool_call_round_trip_feeds_result_back() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![
        vec![
            named_call("get_weather"),
            call_arguments("{\"city\":"),
            call_arguments("\"Brno\"}"),
            finished(FinishReason::ToolCall),
        ],
        vec![content("Sunny."), finished(FinishReason::Stop)],
    ]);
    let mut tools = ToolTable::new();
    tools.register(definition("get_weather"), Box::new(StaticTool("22C, sunny")));

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let outcome = conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .expect("turn should succeed");
    assert_eq!(outcome.response(), "Sunny.");

    let requests = client.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[1],
        vec![
            Message::user("Hi"),
            Message::tool_call("get_weather", "{\"city\":\"Brno\"}"),
            Message::tool_result("get_weather", "22C, sunny"),
        ]
    );

    assert_eq!(
        store.read_log(Destination::Conversation).unwrap(),
        vec![
            Message::user("Hi"),
            Message::tool_call("get_weather", "{\n  \"city\": \"Brno\"\n}"),
            Message::tool_result("get_weather", "22C, sunny"),
            Message::assistant("Sunny."),
        ]
    );
}

#[tokio::test]
async fn unknown_function_gets_synthesized_result() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![
        vec![
            named_call("launch_rockets"),
            call_arguments("{}"),
            finished(FinishReason::ToolCall),
        ],
        vec![content("I cannot do that."), finished(FinishReason::Stop)],
    ]);
    let tools = ToolTable::new();

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .expect("unknown function is not an error");

    let log = store.read_log(Destination::Conversation).unwrap();
    assert_eq!(log[2], Message::tool_result("launch_rockets", UNKNOWN_FUNCTION));
    assert_eq!(client.requests().len(), 2);
}

#[tokio::test]
async fn superseded_call_is_never_dispatched() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![
        vec![
            named_call("first"),
            call_arguments("{\"partial\":"),
            named_call("second"),
            call_arguments("{}"),
            finished(FinishReason::ToolCall),
        ],
        vec![finished(FinishReason::Stop)],
    ]);
    let mut tools = ToolTable::new();
    tools.register(definition("first"), Box::new(StaticTool("one")));
    tools.register(definition("second"), Box::new(StaticTool("two")));

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        store.read_log(Destination::Conversation).unwrap(),
        vec![
            Message::user("Hi"),
            Message::tool_call("second", "{}"),
            Message::tool_result("second", "two"),
        ]
    );
}

#[tokio::test]
async fn other_finish_reason_ends_turn_without_finishing_session() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        content("truncated"),
        finished(FinishReason::Other("length".to_string())),
    ]]);
    let tools = ToolTable::new();

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let outcome = conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.response(), "truncated");
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn stream_failure_fails_turn_and_keeps_partial_log() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        content("Hal"),
        StreamEvent::Failed(StreamError::Status {
            code: 500,
            reason: "Internal Server Error".to_string(),
        }),
    ]]);
    let tools = ToolTable::new();

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let err = conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TurnError::Stream(StreamError::Status { code: 500, .. })
    ));
    assert_eq!(raw_log(&store), "# user:\nHi\n\n# assistant:\nHal");
}

#[tokio::test]
async fn connection_closed_mid_response_fails_turn() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        content("Hel"),
        named_call("get_weather"),
        call_arguments("{\"city\":"),
    ]]);
    let mut tools = ToolTable::new();
    tools.register(definition("get_weather"), Box::new(StaticTool("22C, sunny")));

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let err = conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Stream(StreamError::Api(_))));
    assert_eq!(raw_log(&store), "# user:\nHi\n\n# assistant:\nHel");
    assert_eq!(client.requests().len(), 1);
}

#[tokio::test]
async fn failing_tool_fails_turn() {
    let (_dir, store) = setup();
    let client = ScriptedClient::new(vec![vec![
        named_call("broken"),
        finished(FinishReason::ToolCall),
    ]]);
    let mut tools = ToolTable::new();
    tools.register(definition("broken"), Box::new(FailingTool));

    let mut conversation = Conversation::new(
        &client,
        &tools,
        &store,
        Destination::Conversation,
        Vec::new(),
    );
    let err = conversation
        .run_turn(
            store.messages(Destination::Conversation).unwrap(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TurnError::Tool(ToolError::Failed { .. })));
    assert_eq!(
        store.read_log(Destination::Conversation).unwrap().last(),
        Some(&Message::tool_call("broken", ""))
    );
}

#[test]
fn session_finishes_only_on_stop() {
    let mut session = CompletionSession::new(Vec::new(), Vec::new());
    assert_eq!(session.state(), TurnState::Idle);

    session.observe(&StreamChunk::Finished(FinishReason::ToolCall));
    assert!(!session.is_finished());

    session.observe(&StreamChunk::Finished(FinishReason::Other(
        "length".to_string(),
    )));
    assert!(!session.is_finished());

    session.observe(&StreamChunk::Finished(FinishReason::Stop));
    assert!(session.is_finished());

    session.observe(&StreamChunk::Finished(FinishReason::ToolCall));
    assert!(!session.is_finished());
}

#[test]
fn pretty_arguments_falls_back_to_raw_text() {
    assert_eq!(pretty_arguments("{\"a\":1}"), "{\n  \"a\": 1\n}");
    assert_eq!(pretty_arguments("{\"a\":"), "{\"a\":");
}
