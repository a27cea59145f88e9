//! Tool definitions and the capability the conversation uses to run them.
//!
//! Discovery lives outside the core (see [`crate::plugins`]); the
//! conversation only needs [`ToolProvider::definitions`] to advertise tools
//! and [`ToolProvider::lookup`] to run one by name.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A callable tool as advertised to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: ParametersSchema,
}

/// Top-level parameter contract: always an object with named properties.
///
/// Keys the client does not model are kept in `extra` so the definition is
/// forwarded unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParametersSchema {
    #[serde(rename = "type", default = "object_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Schema of a single property. Object-typed properties may declare one
/// further level of `properties`. `type` is optional so that `anyOf`,
/// `$ref` and enum-only properties pass through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn object_type() -> String {
    "object".to_string()
}

/// Failure of the tool itself, as opposed to an unknown tool name.
#[derive(Debug)]
pub enum ToolError {
    /// The tool could not be started.
    Launch {
        tool: String,
        source: std::io::Error,
    },
    /// The tool ran but reported failure.
    Failed { tool: String, detail: String },
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::Launch { tool, source } => {
                write!(f, "Failed to launch function {tool}: {source}")
            }
            ToolError::Failed { tool, detail } => write!(f, "Function {tool} failed: {detail}"),
        }
    }
}

impl std::error::Error for ToolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ToolError::Launch { source, .. } => Some(source),
            ToolError::Failed { .. } => None,
        }
    }
}

#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Runs the tool with the raw JSON arguments produced by the model.
    async fn invoke(&self, arguments: &str) -> Result<String, ToolError>;
}

pub trait ToolProvider: Send + Sync {
    fn definitions(&self) -> &[ToolDefinition];
    fn lookup(&self, name: &str) -> Option<&dyn Tool>;
}

/// In-memory set of tools keyed by definition name.
#[derive(Default)]
pub struct ToolTable {
    definitions: Vec<ToolDefinition>,
    tools: Vec<Box<dyn Tool>>,
}

impl ToolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool. A later registration with the same name shadows the
    /// earlier one for lookups, but both definitions stay advertised.
    pub fn register(&mut self, definition: ToolDefinition, tool: Box<dyn Tool>) {
        self.definitions.push(definition);
        self.tools.push(tool);
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }
}

impl ToolProvider for ToolTable {
    fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    fn lookup(&self, name: &str) -> Option<&dyn Tool> {
        self.definitions
            .iter()
            .rposition(|definition| definition.name == name)
            .map(|index| self.tools[index].as_ref())
    }
}
