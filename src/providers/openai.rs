//! OpenAI-style wire format adapter.
//!
//! Serves `openai`, `deepseek`, `openrouter`, and any other provider
//! declaring `api_format = openai` in the catalog.

use serde_json::{json, Map, Value};

use crate::catalog::ProviderSpec;
use crate::error::{BashError, Result};
use crate::protocol::{
    strip_reasoning_markers, ChatResponse, ContentBlock, Role, StopReason, Usage,
};

use super::{ChatRequest, WireAdapter};

pub struct OpenAiAdapter;

impl WireAdapter for OpenAiAdapter {
    fn encode_request(&self, provider: &ProviderSpec, request: &ChatRequest) -> Value {
        let mut messages: Vec<Value> = Vec::new();
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        for msg in request.messages {
            encode_message(msg, &mut messages);
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("messages".into(), Value::Array(messages));
        body.insert("temperature".into(), json!(request.temperature));
        let max_tokens_field = provider.max_tokens_field.unwrap_or("max_tokens");
        body.insert(max_tokens_field.into(), json!(request.max_tokens));

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(tools));
        }

        Value::Object(body)
    }

    fn decode_response(&self, body: &Value) -> Result<ChatResponse> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BashError::Provider("openai response has no choices".to_string()))?;
        let message = choice
            .get("message")
            .ok_or_else(|| BashError::Provider("openai choice has no message".to_string()))?;

        let mut content: Vec<ContentBlock> = Vec::new();
        if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
            let text = strip_reasoning_markers(text);
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }

        let mut has_tool_calls = false;
        if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
            for call in calls {
                let id = call
                    .get("id")
                    .and_then(|i| i.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                let function = call.get("function").cloned().unwrap_or_default();
                let name = function
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string();
                // Arguments arrive as a JSON-encoded string
                let input = function
                    .get("arguments")
                    .and_then(|a| a.as_str())
                    .and_then(|a| serde_json::from_str(a).ok())
                    .unwrap_or_else(|| json!({}));
                content.push(ContentBlock::ToolUse { id, name, input });
                has_tool_calls = true;
            }
        }

        let finish = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .unwrap_or("stop");
        let stop_reason = if has_tool_calls || finish == "tool_calls" {
            StopReason::ToolUse
        } else {
            match finish {
                "stop" => StopReason::EndTurn,
                "length" => StopReason::MaxTokens,
                _ => StopReason::Error,
            }
        };

        let usage = body.get("usage").cloned().unwrap_or_default();
        let usage = Usage::new(
            usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            usage
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        );

        Ok(ChatResponse {
            stop_reason,
            content,
            usage,
        })
    }

    fn endpoint(&self, base_url: &str, _model: &str, _api_key: &str) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn headers(&self, _provider: &ProviderSpec, api_key: &str) -> Vec<(String, String)> {
        vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", api_key),
            ),
            ("content-type".to_string(), "application/json".to_string()),
        ]
    }
}

/// Encode one normalized message; tool-result messages expand into one
/// `role: tool` wire message per result block.
fn encode_message(msg: &crate::protocol::ChatMessage, out: &mut Vec<Value>) {
    match msg.role {
        Role::User => {
            let results: Vec<&ContentBlock> = msg
                .content
                .iter()
                .filter(|b| matches!(b, ContentBlock::ToolResult { .. }))
                .collect();
            if !results.is_empty() {
                for block in results {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        let text = if *is_error {
                            format!("Error: {}", content)
                        } else {
                            content.clone()
                        };
                        out.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": text,
                        }));
                    }
                }
                return;
            }

            if msg.has_images() {
                let parts: Vec<Value> = msg
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
                        ContentBlock::Image { media_type, data } => Some(json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:{};base64,{}", media_type, data)}
                        })),
                        _ => None,
                    })
                    .collect();
                out.push(json!({"role": "user", "content": parts}));
            } else {
                out.push(json!({"role": "user", "content": msg.text()}));
            }
        }
        Role::Assistant => {
            let tool_calls: Vec<Value> = msg
                .content
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        }
                    })),
                    _ => None,
                })
                .collect();

            let text = msg.text();
            let mut wire = Map::new();
            wire.insert("role".into(), json!("assistant"));
            wire.insert(
                "content".into(),
                if text.is_empty() {
                    Value::Null
                } else {
                    json!(text)
                },
            );
            if !tool_calls.is_empty() {
                wire.insert("tool_calls".into(), Value::Array(tool_calls));
            }
            out.push(Value::Object(wire));
        }
    }
}
