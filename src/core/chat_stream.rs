use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use futures_util::StreamExt;
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use crate::api::{
    ChatMessage, ChatRequest, ChatResponse, ChatToolCall, ChatToolCallFunction,
    ChatToolDefinition, SamplingParams,
};
use crate::core::message::Message;
use crate::core::tool_call::{FunctionCallResponse, ToolCallAccumulator, ToolCallFragment};
use crate::core::tools::ToolDefinition;
use crate::utils::url::construct_api_url;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCall,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "stop" => FinishReason::Stop,
            "tool_calls" | "tool_call" | "function_call" => FinishReason::ToolCall,
            other => FinishReason::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    Content(String),
    FunctionCall(FunctionCallResponse),
    Finished(FinishReason),
}

/// Raw events sent from the network task to the consuming [`CompletionStream`].
#[derive(Debug)]
pub enum StreamEvent {
    Content(String),
    ToolCall(ToolCallFragment),
    Finished(FinishReason),
    /// The `[DONE]` sentinel.
    Done,
    Failed(StreamError),
}

#[derive(Debug)]
pub enum StreamError {
    /// The caller cancelled the stream.
    Aborted,
    /// The endpoint answered with a non-success status.
    Status { code: u16, reason: String },
    /// The request could not be sent or the body could not be read.
    Transport(reqwest::Error),
    /// The stream carried an error payload or a payload that is not a chunk.
    Api(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Aborted => write!(f, "The stream has been aborted"),
            StreamError::Status { code, reason } => write!(f, "{reason} ({code})"),
            StreamError::Transport(source) => write!(f, "Request failed: {source}"),
            StreamError::Api(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Transport(source) => Some(source),
            _ => None,
        }
    }
}

/// Maps the transcript onto the wire format.
///
/// Adjacent text messages of the same role are joined with a blank line.
/// Tool calls and results are paired by name (each result answers the
/// nearest earlier unanswered call of that name) and receive synthetic ids;
/// entries that cannot be paired are left out because the endpoint rejects
/// them.
pub fn build_api_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut open_calls: Vec<(&str, usize)> = Vec::new();
    let mut answers: HashMap<usize, usize> = HashMap::new();
    let mut answered: HashSet<usize> = HashSet::new();

    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::ToolCall { name, .. } => open_calls.push((name.as_str(), index)),
            Message::ToolResult { name, .. } => {
                match open_calls.iter().rposition(|(open, _)| *open == name) {
                    Some(position) => {
                        let (_, call_index) = open_calls.remove(position);
                        answers.insert(index, call_index);
                        answered.insert(call_index);
                    }
                    None => warn!(function = %name, "Dropping function result without a call"),
                }
            }
            Message::Text { .. } => {}
        }
    }

    let mut api_messages: Vec<ChatMessage> = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::Text { role, content } => {
                let api_role = role.to_api_role();
                if let Some(last) = api_messages.last_mut() {
                    let mergeable = last.role == api_role
                        && last.tool_calls.is_none()
                        && last.tool_call_id.is_none();
                    if let (true, Some(existing)) = (mergeable, last.content.as_mut()) {
                        existing.push_str("\n\n");
                        existing.push_str(content);
                        continue;
                    }
                }
                api_messages.push(ChatMessage {
                    role: api_role.to_string(),
                    content: Some(content.clone()),
                    tool_call_id: None,
                    tool_calls: None,
                });
            }
            Message::ToolCall { name, arguments } => {
                if !answered.contains(&index) {
                    warn!(function = %name, "Dropping function call without a result");
                    continue;
                }
                api_messages.push(ChatMessage {
                    role: message.role().to_api_role().to_string(),
                    content: None,
                    tool_call_id: None,
                    tool_calls: Some(vec![ChatToolCall {
                        id: call_id(index),
                        kind: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }]),
                });
            }
            Message::ToolResult { content, .. } => {
                if let Some(call_index) = answers.get(&index) {
                    api_messages.push(ChatMessage {
                        role: message.role().to_api_role().to_string(),
                        content: Some(content.clone()),
                        tool_call_id: Some(call_id(*call_index)),
                        tool_calls: None,
                    });
                }
            }
        }
    }

    api_messages
}

fn call_id(index: usize) -> String {
    format!("call_{index}")
}

pub fn build_request(
    model: &str,
    params: &SamplingParams,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> ChatRequest {
    let tools: Vec<ChatToolDefinition> = tools.iter().map(ChatToolDefinition::from).collect();
    let has_tools = !tools.is_empty();
    ChatRequest {
        model: model.to_string(),
        params: params.clone(),
        messages: build_api_messages(messages),
        tools: has_tools.then_some(tools),
        tool_choice: has_tools.then_some("auto"),
        stream: true,
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> bool {
    if payload == "[DONE]" {
        let _ = tx.send(StreamEvent::Done);
        return true;
    }

    match serde_json::from_str::<ChatResponse>(payload) {
        Ok(response) => {
            let Some(choice) = response.choices.into_iter().next() else {
                return false;
            };
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content.filter(|content| !content.is_empty()) {
                    let _ = tx.send(StreamEvent::Content(content));
                }
                for tool_call in delta.tool_calls.into_iter().flatten() {
                    if let Some(function) = tool_call.function {
                        let _ = tx.send(StreamEvent::ToolCall(ToolCallFragment {
                            name: function.name.filter(|name| !name.is_empty()),
                            arguments: function.arguments,
                        }));
                    }
                }
                if let Some(function) = delta.function_call {
                    let _ = tx.send(StreamEvent::ToolCall(ToolCallFragment {
                        name: function.name.filter(|name| !name.is_empty()),
                        arguments: function.arguments,
                    }));
                }
            }
            if let Some(reason) = choice.finish_reason {
                let _ = tx.send(StreamEvent::Finished(FinishReason::from_wire(&reason)));
            }
            false
        }
        Err(_) => {
            if payload.trim().is_empty() {
                return false;
            }

            let _ = tx.send(StreamEvent::Failed(StreamError::Api(format_api_error(
                payload,
            ))));
            true
        }
    }
}

fn process_sse_line(line: &str, tx: &mpsc::UnboundedSender<StreamEvent>) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx))
        .unwrap_or(false)
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value) {
                Some(summary) if !summary.is_empty() => {
                    format!("API Error: {summary}\n{pretty_json}")
                }
                _ => format!("API Error:\n{pretty_json}"),
            };
        }
    }

    format!("API Error: {trimmed}")
}

/// Consumer side of one streaming response.
///
/// Tool-call fragments are assembled here and surfaced as a single
/// [`StreamChunk::FunctionCall`] right before the finish signal that ends
/// them. A stream that closes before a finish reason or `[DONE]` arrived
/// yields an error. Dropping the stream stops its network task.
pub struct CompletionStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
    tool_call: ToolCallAccumulator,
    queued: VecDeque<StreamChunk>,
    saw_end: bool,
    done: bool,
    _stop_on_drop: DropGuard,
}

impl CompletionStream {
    pub fn new(rx: mpsc::UnboundedReceiver<StreamEvent>, cancel: &CancellationToken) -> Self {
        let cancel = cancel.child_token();
        Self {
            rx,
            _stop_on_drop: cancel.clone().drop_guard(),
            cancel,
            tool_call: ToolCallAccumulator::new(),
            queued: VecDeque::new(),
            saw_end: false,
            done: false,
        }
    }

    /// Token the producing task should watch; cancelled when the caller's
    /// token is cancelled or this stream is dropped.
    pub fn producer_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next(&mut self) -> Option<Result<StreamChunk, StreamError>> {
        loop {
            if let Some(chunk) = self.queued.pop_front() {
                return Some(Ok(chunk));
            }
            if self.done {
                return None;
            }

            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.done = true;
                    return Some(Err(StreamError::Aborted));
                }
                event = self.rx.recv() => event,
            };

            match event {
                None => {
                    self.done = true;
                    if self.saw_end {
                        return None;
                    }
                    return Some(Err(StreamError::Api(
                        "stream ended unexpectedly".to_string(),
                    )));
                }
                Some(StreamEvent::Content(text)) => return Some(Ok(StreamChunk::Content(text))),
                Some(StreamEvent::ToolCall(fragment)) => self.tool_call.start_or_continue(fragment),
                Some(StreamEvent::Done) => self.saw_end = true,
                Some(StreamEvent::Finished(reason)) => {
                    self.saw_end = true;
                    if reason == FinishReason::ToolCall {
                        if let Some(call) = self.tool_call.finalize() {
                            self.queued.push_back(StreamChunk::FunctionCall(call));
                        }
                    }
                    self.queued.push_back(StreamChunk::Finished(reason));
                }
                Some(StreamEvent::Failed(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Opens streaming completions for a conversation.
pub trait CompletionClient {
    fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> CompletionStream;
}

#[derive(Clone)]
pub struct ChatStreamService {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    params: SamplingParams,
}

impl ChatStreamService {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        params: SamplingParams,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            params,
        }
    }
}

impl CompletionClient for ChatStreamService {
    fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
    ) -> CompletionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = CompletionStream::new(rx, cancel);
        let cancel_token = stream.producer_token();

        let request = build_request(&self.model, &self.params, messages, tools);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Opening completion stream"
        );

        let http_request = self
            .client
            .post(construct_api_url(&self.base_url, "chat/completions"))
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
            .json(&request);

        tokio::spawn(async move {
            tokio::select! {
                _ = read_stream(http_request, &tx) => {}
                _ = cancel_token.cancelled() => {
                    let _ = tx.send(StreamEvent::Failed(StreamError::Aborted));
                }
            }
        });

        stream
    }
}

async fn read_stream(http_request: reqwest::RequestBuilder, tx: &mpsc::UnboundedSender<StreamEvent>) {
    let response = match http_request.send().await {
        Ok(response) => response,
        Err(err) => {
            let _ = tx.send(StreamEvent::Failed(StreamError::Transport(err)));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if serde_json::from_str::<serde_json::Value>(&body).is_ok() {
            error!(status = status.as_u16(), "{}", format_api_error(&body));
        }
        let _ = tx.send(StreamEvent::Failed(StreamError::Status {
            code: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string(),
        }));
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(StreamEvent::Failed(StreamError::Transport(err)));
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let should_end = match std::str::from_utf8(&buffer[..newline_pos]) {
                Ok(line) => process_sse_line(line.trim(), tx),
                Err(err) => {
                    warn!("Invalid UTF-8 in stream: {err}");
                    false
                }
            };
            buffer.drain(..=newline_pos);
            if should_end {
                return;
            }
        }
    }

    if let Ok(line) = std::str::from_utf8(&buffer) {
        process_sse_line(line.trim(), tx);
    }
}
