//! Google Gemini wire format adapter.
//!
//! Gemini has no tool-call ids on the wire; ids are synthesized during
//! decode (unique within the turn) and mapped back to function names during
//! encode so the normalized protocol stays id-based.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use crate::catalog::ProviderSpec;
use crate::error::{BashError, Result};
use crate::protocol::{
    strip_reasoning_markers, ChatResponse, ContentBlock, Role, StopReason, Usage,
};

use super::{ChatRequest, WireAdapter};

pub struct GoogleAdapter;

impl WireAdapter for GoogleAdapter {
    fn encode_request(&self, _provider: &ProviderSpec, request: &ChatRequest) -> Value {
        // Map synthesized tool-use ids back to function names so
        // functionResponse parts can carry the name Gemini expects.
        let mut id_to_name: HashMap<&str, &str> = HashMap::new();
        for msg in request.messages {
            for block in &msg.content {
                if let ContentBlock::ToolUse { id, name, .. } = block {
                    id_to_name.insert(id, name);
                }
            }
        }

        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                let parts: Vec<Value> = msg
                    .content
                    .iter()
                    .map(|block| encode_part(block, &id_to_name))
                    .collect();
                json!({"role": role, "parts": parts})
            })
            .collect();

        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));
        if !request.system.is_empty() {
            body.insert(
                "system_instruction".into(),
                json!({"parts": [{"text": request.system}]}),
            );
        }
        body.insert(
            "generationConfig".into(),
            json!({
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }),
        );
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{"functionDeclarations": declarations}]),
            );
        }

        Value::Object(body)
    }

    fn decode_response(&self, body: &Value) -> Result<ChatResponse> {
        let candidate = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| BashError::Provider("gemini response has no candidates".to_string()))?;

        let empty = Vec::new();
        let parts = candidate
            .pointer("/content/parts")
            .and_then(|p| p.as_array())
            .unwrap_or(&empty);

        let mut content: Vec<ContentBlock> = Vec::new();
        let mut call_index = 0u32;
        let turn_nonce = uuid::Uuid::new_v4().simple().to_string();
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                let text = strip_reasoning_markers(text);
                if !text.is_empty() {
                    content.push(ContentBlock::Text { text });
                }
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string();
                let input = call.get("args").cloned().unwrap_or_else(|| json!({}));
                // Synthesize an id unique within the turn.
                let id = format!("call_{}_{}", call_index, &turn_nonce[..8]);
                call_index += 1;
                content.push(ContentBlock::ToolUse { id, name, input });
            }
        }

        let has_calls = call_index > 0;
        let finish = candidate
            .get("finishReason")
            .and_then(|f| f.as_str())
            .unwrap_or("STOP");
        let stop_reason = if has_calls {
            StopReason::ToolUse
        } else {
            match finish {
                "STOP" => StopReason::EndTurn,
                "MAX_TOKENS" => StopReason::MaxTokens,
                _ => StopReason::Error,
            }
        };

        let usage = Usage::new(
            body.pointer("/usageMetadata/promptTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            body.pointer("/usageMetadata/candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        );

        Ok(ChatResponse {
            stop_reason,
            content,
            usage,
        })
    }

    fn endpoint(&self, base_url: &str, model: &str, api_key: &str) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            base_url.trim_end_matches('/'),
            model,
            api_key
        )
    }

    fn headers(&self, _provider: &ProviderSpec, _api_key: &str) -> Vec<(String, String)> {
        vec![("content-type".to_string(), "application/json".to_string())]
    }
}

fn encode_part(block: &ContentBlock, id_to_name: &HashMap<&str, &str>) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"text": text}),
        ContentBlock::ToolUse { name, input, .. } => {
            json!({"functionCall": {"name": name, "args": input}})
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let name = id_to_name.get(tool_use_id.as_str()).copied().unwrap_or("tool");
            let response = if *is_error {
                json!({"error": content})
            } else {
                json!({"content": content})
            };
            json!({"functionResponse": {"name": name, "response": response}})
        }
        ContentBlock::Image { media_type, data } => {
            json!({"inline_data": {"mime_type": media_type, "data": data}})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::protocol::ChatMessage;
    use crate::providers::ToolSpec;

    fn provider() -> &'static ProviderSpec {
        catalog::provider("google").unwrap()
    }

    #[test]
    fn test_encode_roles_and_system() {
        let messages = vec![
            ChatMessage::user("question"),
            ChatMessage::assistant("answer"),
        ];
        let request = ChatRequest {
            model: "gemini-2.0-flash",
            system: "be helpful",
            messages: &messages,
            max_tokens: 256,
            temperature: 0.4,
            tools: &[],
        };
        let body = GoogleAdapter.encode_request(provider(), &request);

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "be helpful"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
    }

    #[test]
    fn test_encode_tools_as_function_declarations() {
        let tools = vec![ToolSpec::new("cron", "scheduler", json!({"type": "object"}))];
        let messages = vec![ChatMessage::user("x")];
        let request = ChatRequest {
            model: "gemini-2.0-flash",
            system: "",
            messages: &messages,
            max_tokens: 1,
            temperature: 0.0,
            tools: &tools,
        };
        let body = GoogleAdapter.encode_request(provider(), &request);
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "cron");
    }

    #[test]
    fn test_encode_function_response_restores_name() {
        let messages = vec![
            ChatMessage {
                role: Role::Assistant,
                content: vec![ContentBlock::ToolUse {
                    id: "call_0_deadbeef".into(),
                    name: "memory".into(),
                    input: json!({"action": "get"}),
                }],
            },
            ChatMessage::tool_results(vec![ContentBlock::tool_result(
                "call_0_deadbeef",
                "42",
                false,
            )]),
        ];
        let request = ChatRequest {
            model: "gemini-2.0-flash",
            system: "",
            messages: &messages,
            max_tokens: 1,
            temperature: 0.0,
            tools: &[],
        };
        let body = GoogleAdapter.encode_request(provider(), &request);

        let response_part = &body["contents"][1]["parts"][0]["functionResponse"];
        assert_eq!(response_part["name"], "memory");
        assert_eq!(response_part["response"]["content"], "42");
    }

    #[test]
    fn test_decode_text_stop() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2}
        });
        let response = GoogleAdapter.decode_response(&body).unwrap();
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.text(), "hello");
        assert_eq!(response.usage.input_tokens, 7);
        assert_eq!(response.usage.output_tokens, 2);
    }

    #[test]
    fn test_decode_function_call_synthesizes_unique_ids() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "shell", "args": {"command": "ls"}}},
                    {"functionCall": {"name": "memory", "args": {"action": "list"}}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let response = GoogleAdapter.decode_response(&body).unwrap();
        // functionCall parts force tool_use regardless of finishReason
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        let uses = response.tool_uses();
        assert_eq!(uses.len(), 2);
        assert_ne!(uses[0].0, uses[1].0, "synthesized ids must be unique");
        assert_eq!(uses[0].1, "shell");
        assert_eq!(uses[1].2, &json!({"action": "list"}));
    }

    #[test]
    fn test_decode_max_tokens() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "trunc"}]},
                "finishReason": "MAX_TOKENS"
            }]
        });
        let response = GoogleAdapter.decode_response(&body).unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
    }

    #[test]
    fn test_decode_safety_finish_is_error() {
        let body = json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        });
        let response = GoogleAdapter.decode_response(&body).unwrap();
        assert_eq!(response.stop_reason, StopReason::Error);
    }

    #[test]
    fn test_decode_no_candidates_is_error() {
        let err = GoogleAdapter.decode_response(&json!({})).unwrap_err();
        assert!(err.to_string().contains("no candidates"));
    }

    #[test]
    fn test_endpoint_embeds_model_and_key() {
        let url = GoogleAdapter.endpoint(
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-2.0-flash",
            "KEY",
        );
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent?key=KEY"
        );
    }

    #[test]
    fn test_roundtrip_text_verbatim() {
        let messages = vec![ChatMessage::user("verbatim text")];
        let request = ChatRequest {
            model: "gemini-2.0-flash",
            system: "",
            messages: &messages,
            max_tokens: 1,
            temperature: 0.0,
            tools: &[],
        };
        let encoded = GoogleAdapter.encode_request(provider(), &request);
        let fixture = json!({
            "candidates": [{
                "content": {"parts": [{"text": encoded["contents"][0]["parts"][0]["text"]}]},
                "finishReason": "STOP"
            }]
        });
        let decoded = GoogleAdapter.decode_response(&fixture).unwrap();
        assert_eq!(decoded.text(), "verbatim text");
    }

    #[test]
    fn test_encode_image_inline_data() {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::Image {
                media_type: "image/jpeg".into(),
                data: "Zm9v".into(),
            }],
        }];
        let request = ChatRequest {
            model: "gemini-2.0-flash",
            system: "",
            messages: &messages,
            max_tokens: 1,
            temperature: 0.0,
            tools: &[],
        };
        let body = GoogleAdapter.encode_request(provider(), &request);
        let part = &body["contents"][0]["parts"][0];
        assert_eq!(part["inline_data"]["mime_type"], "image/jpeg");
    }
}
