use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::core::tools::{Tool, ToolError};

/// Runs a plugin executable once per call.
#[derive(Debug, Clone)]
pub struct PluginTool {
    name: String,
    program: PathBuf,
}

impl PluginTool {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for PluginTool {
    async fn invoke(&self, arguments: &str) -> Result<String, ToolError> {
        debug!(plugin = %self.name, program = %self.program.display(), "Running plugin");
        let output = Command::new(&self.program)
            .arg(arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ToolError::Launch {
                tool: self.name.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(plugin = %self.name, stderr = %stderr.trim_end(), "Plugin stderr");
        }

        if !output.status.success() {
            let detail = match stderr.trim() {
                "" => output.status.to_string(),
                message => format!("{}: {message}", output.status),
            };
            return Err(ToolError::Failed {
                tool: self.name.clone(),
                detail,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
