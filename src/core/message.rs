/// Closed set of roles a transcript entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    System,
    Assistant,
    AssistantToolCall,
    ToolResult,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::System,
        Role::Assistant,
        Role::User,
        Role::AssistantToolCall,
        Role::ToolResult,
    ];

    /// Name used in transcript headers (`# <name>:`).
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant => "assistant",
            Role::AssistantToolCall => "assistant calling function",
            Role::ToolResult => "function result",
        }
    }

    /// Role name understood by the completion endpoint for plain-text entries.
    pub fn to_api_role(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::System => "system",
            Role::Assistant | Role::AssistantToolCall => "assistant",
            Role::ToolResult => "tool",
        }
    }

    pub fn is_text(self) -> bool {
        matches!(self, Role::User | Role::System | Role::Assistant)
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == value)
            .ok_or_else(|| format!("invalid transcript role: {value}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text { role: Role, content: String },
    ToolCall { name: String, arguments: String },
    ToolResult { name: String, content: String },
}

impl Message {
    /// Builds a plain-text message. `role` must be one of the text roles.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        debug_assert!(role.is_text(), "{} is not a text role", role.as_str());
        Message::Text {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    pub fn tool_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Message::ToolCall {
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    pub fn tool_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::ToolResult {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::Text { role, .. } => *role,
            Message::ToolCall { .. } => Role::AssistantToolCall,
            Message::ToolResult { .. } => Role::ToolResult,
        }
    }

    /// Body as it appears under the role header in a transcript.
    pub fn transcript_body(&self) -> String {
        match self {
            Message::Text { content, .. } => content.clone(),
            Message::ToolCall { name, arguments } => join_name_and_body(name, arguments),
            Message::ToolResult { name, content } => join_name_and_body(name, content),
        }
    }
}

fn join_name_and_body(name: &str, body: &str) -> String {
    if body.is_empty() {
        name.to_string()
    } else {
        format!("{name}\n{body}")
    }
}
