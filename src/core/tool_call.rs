/// One streamed piece of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// A fully assembled invocation. `arguments` is the raw JSON text exactly as
/// the endpoint produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug)]
struct PendingToolCall {
    name: String,
    fragments: Vec<String>,
}

/// Collects fragments of the tool call currently being streamed.
///
/// A fragment that carries a name always opens a new call and drops whatever
/// was accumulated before it; argument-only fragments extend the open call.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: Option<PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_or_continue(&mut self, fragment: ToolCallFragment) {
        if let Some(name) = fragment.name {
            self.pending = Some(PendingToolCall {
                name,
                fragments: fragment.arguments.into_iter().collect(),
            });
            return;
        }

        if let (Some(pending), Some(arguments)) = (self.pending.as_mut(), fragment.arguments) {
            pending.fragments.push(arguments);
        }
    }

    pub fn finalize(&mut self) -> Option<FunctionCallResponse> {
        self.pending.take().map(|pending| FunctionCallResponse {
            name: pending.name,
            arguments: pending.fragments.concat(),
        })
    }
}
