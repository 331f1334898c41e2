//! Message tool: deliver text to a channel target through an outbound sink.
//!
//! Channels themselves live outside the core; integration glue provides a
//! sink implementation. The default [`FileOutbox`] appends deliveries to a
//! JSONL outbox under the state directory for a channel worker to drain.

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::{json, Value};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// Channels known to the default deployment.
pub const KNOWN_CHANNELS: &[&str] = &["telegram", "discord", "slack", "web", "cli", "mcp"];

/// Outbound delivery sink.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Deliver `text` to `target` on `channel`, returning a delivery id.
    async fn deliver(&self, channel: &str, target: &str, text: &str) -> Result<String>;
}

/// Default sink: appends deliveries to `{state_dir}/outbox.jsonl`.
pub struct FileOutbox {
    path: PathBuf,
}

impl FileOutbox {
    pub fn new(state_dir: &std::path::Path) -> Self {
        Self {
            path: state_dir.join("outbox.jsonl"),
        }
    }
}

#[async_trait]
impl OutboundSink for FileOutbox {
    async fn deliver(&self, channel: &str, target: &str, text: &str) -> Result<String> {
        if !KNOWN_CHANNELS.contains(&channel) {
            return Err(BashError::Tool(format!("unknown channel '{}'", channel)));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let delivery_id = uuid::Uuid::new_v4().to_string();
        let line = json!({
            "delivery_id": delivery_id,
            "channel": channel,
            "target": target,
            "text": text,
            "queued_at_ms": chrono::Utc::now().timestamp_millis(),
        });

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()
            .map_err(|e| BashError::Tool(format!("outbox lock failed: {}", e)))?;
        let mut writer = &file;
        writeln!(writer, "{}", line)?;
        let _ = file.unlock();

        Ok(delivery_id)
    }
}

/// The `message` tool.
pub struct MessageTool {
    sink: Arc<dyn OutboundSink>,
}

impl MessageTool {
    pub fn new(sink: Arc<dyn OutboundSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to a channel target (e.g. a chat the agent knows)"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "channel": {
                    "type": "string",
                    "description": "Destination channel (telegram, discord, slack, web, cli)"
                },
                "target": {
                    "type": "string",
                    "description": "Chat or user id within the channel"
                },
                "text": {
                    "type": "string",
                    "description": "Message text"
                }
            },
            "required": ["channel", "target", "text"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let channel = args
            .get("channel")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'channel' argument".into()))?;
        let target = args
            .get("target")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'target' argument".into()))?;
        let text = args
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'text' argument".into()))?;

        match self.sink.deliver(channel, target, text).await {
            Ok(delivery_id) => Ok(ToolOutput::json(&json!({"delivery_id": delivery_id}))),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}
