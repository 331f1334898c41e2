//! Introspection tools: `agents_list`, `sessions_list`, `session_status`,
//! and `agent_message`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Weak;

use crate::agent::AgentRuntime;
use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// List configured agents and their effective models.
pub struct AgentsListTool {
    runtime: Weak<AgentRuntime>,
}

impl AgentsListTool {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }

    fn upgraded(&self) -> Result<std::sync::Arc<AgentRuntime>> {
        self.runtime
            .upgrade()
            .ok_or_else(|| BashError::Tool("runtime is no longer available".into()))
    }
}

#[async_trait]
impl Tool for AgentsListTool {
    fn name(&self) -> &str {
        "agents_list"
    }

    fn description(&self) -> &str {
        "List configured agents with their models and engines"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let runtime = self.upgraded()?;
        let agents: Vec<Value> = runtime
            .config()
            .agent_ids()
            .into_iter()
            .map(|id| {
                let settings = runtime.config().agent_settings(&id);
                json!({
                    "agent_id": id,
                    "model": settings.model,
                    "engine": format!("{:?}", settings.engine).to_lowercase(),
                    "profile": settings.profile,
                })
            })
            .collect();
        Ok(ToolOutput::json(&json!({
            "agents": agents,
            "count": agents.len(),
        })))
    }
}

/// List session files known to the store.
pub struct SessionsListTool {
    runtime: Weak<AgentRuntime>,
}

impl SessionsListTool {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Tool for SessionsListTool {
    fn name(&self) -> &str {
        "sessions_list"
    }

    fn description(&self) -> &str {
        "List known conversation sessions"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BashError::Tool("runtime is no longer available".into()))?;
        let sessions = runtime.store().list()?;
        Ok(ToolOutput::json(&json!({
            "sessions": sessions,
            "count": sessions.len(),
        })))
    }
}

/// Report entry count and last activity for one session.
pub struct SessionStatusTool {
    runtime: Weak<AgentRuntime>,
}

impl SessionStatusTool {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Tool for SessionStatusTool {
    fn name(&self) -> &str {
        "session_status"
    }

    fn description(&self) -> &str {
        "Show entry count and last activity for a session"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session": {
                    "type": "string",
                    "description": "Session path as returned by sessions_list"
                }
            },
            "required": ["session"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BashError::Tool("runtime is no longer available".into()))?;
        let session = args
            .get("session")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'session' argument".into()))?;
        if session.contains("..") {
            return Err(BashError::Tool(format!("invalid session '{}'", session)));
        }

        let path = runtime.store().root().join(session);
        if !path.is_file() {
            return Ok(ToolOutput::error(format!("unknown session '{}'", session)));
        }
        let entries = runtime.store().load(&path, None)?;
        let last_ts = entries.iter().rev().find_map(|e| e.ts_ms());
        Ok(ToolOutput::json(&json!({
            "session": session,
            "entries": entries.len(),
            "last_ts_ms": last_ts,
        })))
    }
}

/// Route a message to another agent and return its reply inline.
pub struct AgentMessageTool {
    runtime: Weak<AgentRuntime>,
}

impl AgentMessageTool {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Tool for AgentMessageTool {
    fn name(&self) -> &str {
        "agent_message"
    }

    fn description(&self) -> &str {
        "Send a message to another agent and return its reply"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "agent": {
                    "type": "string",
                    "description": "Target agent id"
                },
                "message": {
                    "type": "string",
                    "description": "Message text for the target agent"
                }
            },
            "required": ["agent", "message"]
        })
    }

    /// Included only when an agent explicitly allows inter-agent calls.
    fn optional(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let runtime = self
            .runtime
            .upgrade()
            .ok_or_else(|| BashError::Tool("runtime is no longer available".into()))?;
        let agent = args
            .get("agent")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'agent' argument".into()))?;
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'message' argument".into()))?;

        // The exchange lives in its own scope keyed by the asking agent, so
        // the two agents' histories stay separate.
        let origin = ctx.agent_id.clone().unwrap_or_else(|| "main".to_string());
        if agent == origin {
            return Ok(ToolOutput::error(
                "an agent cannot message itself; use spawn for sub-tasks",
            ));
        }
        let reply = runtime
            .run(agent, message, &format!("agent:{}", origin), "")
            .await?;
        Ok(ToolOutput::json(&json!({"agent": agent, "reply": reply})))
    }
}
