//! Drives one user turn: streams responses, persists them as they arrive and
//! runs requested tools until the model finishes with `stop`.

use std::fmt;
use std::io::{self, Write};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::chat_stream::{CompletionClient, FinishReason, StreamChunk, StreamError};
use crate::core::message::{Message, Role};
use crate::core::tool_call::FunctionCallResponse;
use crate::core::tools::{ToolDefinition, ToolError, ToolProvider};
use crate::core::transcript::{Destination, TranscriptStore};

#[cfg(test)]
mod tests;

/// Result recorded for calls to tools the provider does not know.
pub const UNKNOWN_FUNCTION: &str = "Unknown function";

pub const ABORT_NOTICE: &str = "Aborted.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    ContentFlushing,
    ToolDispatch,
    Done,
}

/// Mutable state of one turn, which may span several requests.
#[derive(Debug)]
pub struct CompletionSession {
    messages: Vec<Message>,
    tools: Vec<ToolDefinition>,
    is_finished: bool,
    pending_call: Option<FunctionCallResponse>,
    state: TurnState,
}

impl CompletionSession {
    pub fn new(messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            is_finished: false,
            pending_call: None,
            state: TurnState::Idle,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn is_finished(&self) -> bool {
        self.is_finished
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn observe(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::Content(_) => {}
            StreamChunk::FunctionCall(call) => self.pending_call = Some(call.clone()),
            StreamChunk::Finished(reason) => self.is_finished = *reason == FinishReason::Stop,
        }
    }

    pub fn take_pending_call(&mut self) -> Option<FunctionCallResponse> {
        self.pending_call.take()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "Turn state changed");
            self.state = next;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { response: String },
    Aborted { response: String },
}

impl TurnOutcome {
    /// Assistant text streamed during the turn, across all requests.
    pub fn response(&self) -> &str {
        match self {
            TurnOutcome::Completed { response } | TurnOutcome::Aborted { response } => response,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TurnOutcome::Aborted { .. })
    }
}

#[derive(Debug)]
pub enum TurnError {
    Stream(StreamError),
    Tool(ToolError),
    Io(io::Error),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::Stream(err) => write!(f, "{err}"),
            TurnError::Tool(err) => write!(f, "{err}"),
            TurnError::Io(err) => write!(f, "Failed to write conversation: {err}"),
        }
    }
}

impl std::error::Error for TurnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TurnError::Stream(err) => Some(err),
            TurnError::Tool(err) => Some(err),
            TurnError::Io(err) => Some(err),
        }
    }
}

impl From<StreamError> for TurnError {
    fn from(err: StreamError) -> Self {
        TurnError::Stream(err)
    }
}

impl From<ToolError> for TurnError {
    fn from(err: ToolError) -> Self {
        TurnError::Tool(err)
    }
}

impl From<io::Error> for TurnError {
    fn from(err: io::Error) -> Self {
        TurnError::Io(err)
    }
}

pub struct Conversation<'a, C, W> {
    client: &'a C,
    tools: &'a dyn ToolProvider,
    store: &'a TranscriptStore,
    destination: Destination,
    output: W,
}

impl<'a, C: CompletionClient, W: Write> Conversation<'a, C, W> {
    pub fn new(
        client: &'a C,
        tools: &'a dyn ToolProvider,
        store: &'a TranscriptStore,
        destination: Destination,
        output: W,
    ) -> Self {
        Self {
            client,
            tools,
            store,
            destination,
            output,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Runs a turn on top of `messages`, which should already end with the
    /// user's prompt.
    ///
    /// Cancelling `cancel` ends the turn with [`TurnOutcome::Aborted`]; content
    /// written before that point stays in the log.
    pub async fn run_turn(
        &mut self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let mut session = CompletionSession::new(messages, self.tools.definitions().to_vec());
        let mut response = String::new();

        match self.drive(&mut session, &mut response, cancel).await {
            Ok(()) => {
                writeln!(self.output)?;
                self.output.flush()?;
                Ok(TurnOutcome::Completed { response })
            }
            Err(TurnError::Stream(StreamError::Aborted)) => {
                debug!("Turn aborted");
                writeln!(self.output)?;
                writeln!(self.output, "{ABORT_NOTICE}")?;
                self.output.flush()?;
                Ok(TurnOutcome::Aborted { response })
            }
            Err(err) => {
                let _ = writeln!(self.output);
                let _ = self.output.flush();
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        session: &mut CompletionSession,
        response: &mut String,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        loop {
            session.transition(TurnState::Streaming);
            let mut stream = self
                .client
                .stream(session.messages(), session.tools(), cancel);
            let mut assistant_text: Option<String> = None;
            let mut finish_reason = None;

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                session.observe(&chunk);
                match chunk {
                    StreamChunk::Content(text) => {
                        session.transition(TurnState::ContentFlushing);
                        if assistant_text.is_none() {
                            self.store
                                .append_role_header(self.destination, Role::Assistant)?;
                        }
                        let buffer = assistant_text.get_or_insert_with(String::new);
                        self.store.append_fragment(self.destination, &text)?;
                        write!(self.output, "{text}")?;
                        self.output.flush()?;
                        buffer.push_str(&text);
                        response.push_str(&text);
                    }
                    StreamChunk::FunctionCall(_) => {}
                    StreamChunk::Finished(reason) => finish_reason = Some(reason),
                }
            }

            if let Some(text) = assistant_text {
                self.store.append_padding(self.destination)?;
                session.push(Message::assistant(text));
                if session.pending_call.is_some() {
                    writeln!(self.output)?;
                }
            }

            match session.take_pending_call() {
                Some(call) => {
                    session.transition(TurnState::ToolDispatch);
                    self.dispatch(session, call, cancel).await?;
                }
                None => {
                    if !session.is_finished() {
                        warn!(reason = ?finish_reason, "Response ended without stop or function call");
                    }
                    session.transition(TurnState::Done);
                    return Ok(());
                }
            }
        }
    }

    async fn dispatch(
        &mut self,
        session: &mut CompletionSession,
        call: FunctionCallResponse,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        self.store.append(
            self.destination,
            &Message::tool_call(call.name.as_str(), pretty_arguments(&call.arguments)),
        )?;

        let content = match self.tools.lookup(&call.name) {
            Some(tool) => {
                info!(function = %call.name, "Calling function");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StreamError::Aborted.into()),
                    result = tool.invoke(&call.arguments) => result?,
                }
            }
            None => {
                warn!(function = %call.name, "Model requested an unknown function");
                UNKNOWN_FUNCTION.to_string()
            }
        };

        let result = Message::tool_result(call.name.as_str(), content);
        self.store.append(self.destination, &result)?;
        session.push(Message::tool_call(call.name, call.arguments));
        session.push(result);
        Ok(())
    }
}

/// Indented JSON for the log; arguments that are not valid JSON are kept
/// verbatim.
fn pretty_arguments(raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| serde_json::to_string_pretty(&value).ok())
        .unwrap_or_else(|| raw.to_string())
}
