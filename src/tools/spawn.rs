//! Background sub-agent tasks: `spawn` and `spawn_status`.
//!
//! Each task owns `spawn/<task_id>/` with `input.json`, `status`, and
//! `output`. The worker runs the sub-agent in a fresh session scope
//! (`spawn:<task_id>` channel) so parent history never leaks in.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Weak;

use crate::agent::AgentRuntime;
use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

const STATUS_PENDING: &str = "pending";
const STATUS_DONE: &str = "done";
const STATUS_ERROR: &str = "error";

fn task_dir(state_dir: &Path, task_id: &str) -> PathBuf {
    crate::config::spawn_dir(state_dir).join(task_id)
}

/// Spawn a delegated background task.
pub struct SpawnTool {
    runtime: Weak<AgentRuntime>,
}

impl SpawnTool {
    pub fn new(runtime: Weak<AgentRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Spawn a background sub-agent task; poll it with spawn_status"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Task description for the sub-agent"
                },
                "agent": {
                    "type": "string",
                    "description": "Agent id to run the task (default: main)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BashError::Tool("spawn requires a non-empty 'task'".into()))?
            .to_string();
        let agent_id = args
            .get("agent")
            .and_then(|v| v.as_str())
            .unwrap_or("main")
            .to_string();

        let task_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        let dir = task_dir(&ctx.state_dir, &task_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("input.json"),
            serde_json::to_string_pretty(&json!({
                "task": task,
                "agent": agent_id,
                "created_at_ms": chrono::Utc::now().timestamp_millis(),
            }))?,
        )?;
        std::fs::write(dir.join("status"), STATUS_PENDING)?;

        let runtime = self.runtime.clone();
        let worker_id = task_id.clone();
        tokio::spawn(async move {
            let (status, output) = match runtime.upgrade() {
                Some(runtime) => {
                    // Fresh scope: the sub-agent converses on its own
                    // spawn channel, never the parent session.
                    match runtime
                        .run(&agent_id, &task, &format!("spawn:{}", worker_id), "")
                        .await
                    {
                        Ok(result) => (STATUS_DONE, result),
                        Err(e) => (STATUS_ERROR, e.to_string()),
                    }
                }
                None => (STATUS_ERROR, "runtime is no longer available".to_string()),
            };
            let _ = std::fs::write(dir.join("output"), output);
            let _ = std::fs::write(dir.join("status"), status);
        });

        Ok(ToolOutput::json(&json!({"task_id": task_id})))
    }
}

/// Poll a spawned task.
pub struct SpawnStatusTool;

#[async_trait]
impl Tool for SpawnStatusTool {
    fn name(&self) -> &str {
        "spawn_status"
    }

    fn description(&self) -> &str {
        "Check the status and output of a spawned task"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Id returned by spawn"
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let task_id = args
            .get("task_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'task_id' argument".into()))?;
        if task_id.contains('/') || task_id.contains("..") {
            return Err(BashError::Tool(format!("invalid task id '{}'", task_id)));
        }

        let dir = task_dir(&ctx.state_dir, task_id);
        if !dir.is_dir() {
            return Ok(ToolOutput::error(format!("unknown task id '{}'", task_id)));
        }

        let status = std::fs::read_to_string(dir.join("status"))
            .unwrap_or_else(|_| STATUS_PENDING.to_string());
        let mut record = json!({"task_id": task_id, "status": status.trim()});
        if let Ok(output) = std::fs::read_to_string(dir.join("output")) {
            record["output"] = json!(output);
        }
        Ok(ToolOutput::json(&record))
    }
}
