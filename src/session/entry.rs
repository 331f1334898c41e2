//! Session entry types and projection into the normalized message protocol.
//!
//! One entry is one line in a session JSONL file. Entries are tagged by
//! `type` and carry epoch-millisecond timestamps; `meta` entries are runtime
//! bookkeeping and never reach the model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::{ChatMessage, ContentBlock, Role};

/// One line in a session log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entry {
    /// A user turn.
    User { content: String, ts_ms: i64 },
    /// An assistant turn (text only; tool requests are separate entries).
    Assistant { content: String, ts_ms: i64 },
    /// The model requested a tool invocation.
    ToolCall {
        tool_name: String,
        tool_input: Value,
        tool_id: String,
        ts_ms: i64,
    },
    /// Result of a tool invocation.
    ToolResult {
        tool_id: String,
        content: String,
        is_error: bool,
        ts_ms: i64,
    },
    /// Opaque key/value bookkeeping (e.g. external-engine session ids).
    Meta {
        #[serde(flatten)]
        data: Map<String, Value>,
    },
}

impl Entry {
    /// Current epoch milliseconds.
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn user(content: impl Into<String>) -> Self {
        Entry::User {
            content: content.into(),
            ts_ms: Self::now_ms(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Entry::Assistant {
            content: content.into(),
            ts_ms: Self::now_ms(),
        }
    }

    pub fn tool_call(tool_name: &str, tool_input: Value, tool_id: &str) -> Self {
        Entry::ToolCall {
            tool_name: tool_name.to_string(),
            tool_input,
            tool_id: tool_id.to_string(),
            ts_ms: Self::now_ms(),
        }
    }

    pub fn tool_result(tool_id: &str, content: impl Into<String>, is_error: bool) -> Self {
        Entry::ToolResult {
            tool_id: tool_id.to_string(),
            content: content.into(),
            is_error,
            ts_ms: Self::now_ms(),
        }
    }

    pub fn meta(key: &str, value: &str) -> Self {
        let mut data = Map::new();
        data.insert(key.to_string(), Value::String(value.to_string()));
        Entry::Meta { data }
    }

    /// The entry timestamp; `meta` entries carry none.
    pub fn ts_ms(&self) -> Option<i64> {
        match self {
            Entry::User { ts_ms, .. }
            | Entry::Assistant { ts_ms, .. }
            | Entry::ToolCall { ts_ms, .. }
            | Entry::ToolResult { ts_ms, .. } => Some(*ts_ms),
            Entry::Meta { .. } => None,
        }
    }
}

/// Project session entries into normalized messages.
///
/// Consecutive `tool_call` entries merge into the preceding assistant
/// message as `tool_use` blocks; their `tool_result` entries merge into one
/// following user message. `meta` entries are excluded. A `tool_call` with
/// no matching `tool_result` before the next assistant text gets a
/// synthesized error result so the message sequence stays well-formed for
/// every provider.
pub fn entries_to_messages(entries: &[Entry]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::new();
    let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
    let mut result_blocks: Vec<ContentBlock> = Vec::new();

    fn flush_assistant(messages: &mut Vec<ChatMessage>, blocks: &mut Vec<ContentBlock>) {
        if !blocks.is_empty() {
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: std::mem::take(blocks),
            });
        }
    }
    fn flush_results(messages: &mut Vec<ChatMessage>, blocks: &mut Vec<ContentBlock>) {
        if !blocks.is_empty() {
            messages.push(ChatMessage::tool_results(std::mem::take(blocks)));
        }
    }

    for entry in entries {
        match entry {
            Entry::User { content, .. } => {
                flush_assistant(&mut messages, &mut assistant_blocks);
                flush_results(&mut messages, &mut result_blocks);
                messages.push(ChatMessage::user(content.clone()));
            }
            Entry::Assistant { content, .. } => {
                flush_assistant(&mut messages, &mut assistant_blocks);
                flush_results(&mut messages, &mut result_blocks);
                if !content.is_empty() {
                    assistant_blocks.push(ContentBlock::text(content.clone()));
                }
            }
            Entry::ToolCall {
                tool_name,
                tool_input,
                tool_id,
                ..
            } => {
                flush_results(&mut messages, &mut result_blocks);
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: tool_id.clone(),
                    name: tool_name.clone(),
                    input: tool_input.clone(),
                });
            }
            Entry::ToolResult {
                tool_id,
                content,
                is_error,
                ..
            } => {
                flush_assistant(&mut messages, &mut assistant_blocks);
                result_blocks.push(ContentBlock::tool_result(tool_id, content.clone(), *is_error));
            }
            Entry::Meta { .. } => {}
        }
    }
    flush_assistant(&mut messages, &mut assistant_blocks);
    flush_results(&mut messages, &mut result_blocks);

    repair_orphan_tool_uses(messages)
}

/// Ensure every assistant `tool_use` block is answered by a `tool_result` in
/// the next user message, synthesizing error results for orphans. Orphans
/// appear when a run was interrupted between persisting a call and its
/// result; providers reject such sequences outright.
fn repair_orphan_tool_uses(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut repaired: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    let mut iter = messages.into_iter().peekable();

    while let Some(msg) = iter.next() {
        let pending: Vec<String> = msg
            .content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        let is_assistant = msg.role == Role::Assistant;
        repaired.push(msg);

        if !is_assistant || pending.is_empty() {
            continue;
        }

        let answered: std::collections::HashSet<String> = match iter.peek() {
            Some(next) if next.role == Role::User => next
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
                    _ => None,
                })
                .collect(),
            _ => Default::default(),
        };

        let orphans: Vec<ContentBlock> = pending
            .iter()
            .filter(|id| !answered.contains(*id))
            .map(|id| ContentBlock::tool_result(id, "tool call was interrupted", true))
            .collect();
        if orphans.is_empty() {
            continue;
        }

        if let Some(next) = iter.peek_mut() {
            if next.role == Role::User
                && next
                    .content
                    .iter()
                    .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
            {
                // Merge synthesized results into the existing result message,
                // preserving call order ahead of any later results.
                let mut merged = orphans;
                merged.append(&mut next.content);
                next.content = merged;
                continue;
            }
        }
        repaired.push(ChatMessage::tool_results(orphans));
    }

    repaired
}
