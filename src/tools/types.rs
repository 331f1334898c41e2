//! Tool trait and execution context.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use crate::error::Result;

/// Result of a tool invocation: content for the model plus an error flag
/// that propagates into the `tool_result` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result.
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result; the loop continues so the model can recover.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Serialize a JSON value as a successful result.
    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }
}

/// Trait implemented by every tool in the registry.
///
/// Tools receive decoded JSON input and produce a [`ToolOutput`]; faults
/// should surface as `Err` (the dispatcher converts them to error results)
/// or as `ToolOutput::error` when the tool wants to phrase the failure
/// itself.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, as exposed to the model.
    fn name(&self) -> &str;

    /// Human description sent to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the tool input.
    fn schema(&self) -> Value;

    /// Execute with decoded input and the per-run context.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput>;

    /// Optional tools are included only when an agent allows them
    /// explicitly.
    fn optional(&self) -> bool {
        false
    }

    /// Whether this tool is exposed through the MCP bridge.
    fn bridge_exposed(&self) -> bool {
        false
    }

    /// Whether the tool's required environment (API keys, binaries) is
    /// present. Unavailable tools are dropped from every effective set.
    fn available(&self) -> bool {
        true
    }
}

/// Per-run execution context handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Originating channel (`telegram`, `cli`, `mcp`, ...).
    pub channel: Option<String>,
    /// Sender identity within the channel.
    pub sender: Option<String>,
    /// Agent handling the run.
    pub agent_id: Option<String>,
    /// State root for tool-owned subdirectories (memory/, cron/, spawn/).
    pub state_dir: PathBuf,
    /// Workspace directory for file operations and shell commands.
    pub workspace: PathBuf,
}

impl ToolContext {
    pub fn new(state_dir: PathBuf, workspace: PathBuf) -> Self {
        Self {
            state_dir,
            workspace,
            ..Default::default()
        }
    }

    pub fn with_channel(mut self, channel: &str, sender: &str) -> Self {
        self.channel = Some(channel.to_string());
        self.sender = Some(sender.to_string());
        self
    }

    pub fn with_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_output_constructors() {
        let out = ToolOutput::ok("done");
        assert!(!out.is_error);
        assert_eq!(out.content, "done");

        let out = ToolOutput::error("broke");
        assert!(out.is_error);

        let out = ToolOutput::json(&json!({"written": true}));
        assert!(out.content.contains("written"));
        assert!(!out.is_error);
    }

    #[test]
    fn test_context_builder() {
        let ctx = ToolContext::new(PathBuf::from("/state"), PathBuf::from("/work"))
            .with_channel("telegram", "alice")
            .with_agent("main");
        assert_eq!(ctx.channel.as_deref(), Some("telegram"));
        assert_eq!(ctx.sender.as_deref(), Some("alice"));
        assert_eq!(ctx.agent_id.as_deref(), Some("main"));
        assert_eq!(ctx.state_dir, PathBuf::from("/state"));
        assert_eq!(ctx.workspace, PathBuf::from("/work"));
    }
}
