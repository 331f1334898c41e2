//! MCP bridge: NDJSON JSON-RPC 2.0 server over stdio.
//!
//! One line in, one message; responses go out only for requests carrying an
//! id. A curated subset of tools (those flagged `bridge_exposed`) is served;
//! responses are flattened onto a single line.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::tools::{ToolContext, ToolRegistry};

/// MCP protocol revision this bridge speaks.
const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

static TOOL_NAME_RE: OnceCell<Regex> = OnceCell::new();

fn tool_name_re() -> &'static Regex {
    TOOL_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap())
}

/// The bridge server. Wire it to stdin/stdout with [`McpBridge::serve_stdio`]
/// or to any reader/writer pair with [`McpBridge::serve`].
pub struct McpBridge {
    registry: Arc<RwLock<ToolRegistry>>,
    ctx: ToolContext,
    tools_cache: OnceCell<Value>,
}

impl McpBridge {
    pub fn new(registry: Arc<RwLock<ToolRegistry>>, ctx: ToolContext) -> Self {
        Self {
            registry,
            ctx,
            tools_cache: OnceCell::new(),
        }
    }

    /// Serve NDJSON frames from `reader`, writing responses to `writer`.
    /// Returns when the input stream ends.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(line).await {
                let mut frame = response.to_string();
                frame.push('\n');
                writer.write_all(frame.as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Serve on the process stdio.
    pub async fn serve_stdio(&self) -> Result<()> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.serve(stdin, stdout).await
    }

    /// Process one frame. `None` means no response (notification).
    pub async fn handle_line(&self, line: &str) -> Option<Value> {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable MCP frame");
                return Some(error_response(Value::Null, PARSE_ERROR, "Parse error"));
            }
        };

        let id = message.get("id").cloned();
        let method = message.get("method").and_then(|m| m.as_str()).unwrap_or("");
        debug!(method, has_id = id.is_some(), "MCP frame");

        // Notifications never get a response, whatever the method.
        let id = id?;

        let result = match method {
            "initialize" => Ok(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {
                    "name": "bashclaw",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "tools/list" => Ok(self.tools_list().await),
            "tools/call" => {
                let params = message.get("params").cloned().unwrap_or_else(|| json!({}));
                match self.tools_call(&params).await {
                    Ok(result) => Ok(result),
                    Err((code, text)) => Err((code, text)),
                }
            }
            "resources/list" => Ok(json!({"resources": []})),
            "prompts/list" => Ok(json!({"prompts": []})),
            _ => Err((METHOD_NOT_FOUND, format!("Method not found: {}", method))),
        };

        Some(match result {
            Ok(value) => json!({"jsonrpc": "2.0", "id": id, "result": value}),
            Err((code, text)) => error_response(id, code, &text),
        })
    }

    /// The curated tool list, built once and cached.
    async fn tools_list(&self) -> Value {
        if let Some(cached) = self.tools_cache.get() {
            return cached.clone();
        }
        let specs = self.registry.read().await.bridge_specs();
        let tools: Vec<Value> = specs
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "inputSchema": spec.input_schema,
                })
            })
            .collect();
        let value = json!({"tools": tools});
        let _ = self.tools_cache.set(value.clone());
        value
    }

    async fn tools_call(&self, params: &Value) -> std::result::Result<Value, (i64, String)> {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default();
        if !tool_name_re().is_match(name) {
            return Err((INVALID_PARAMS, format!("Invalid tool name: '{}'", name)));
        }

        let exposed = self
            .registry
            .read()
            .await
            .bridge_specs()
            .iter()
            .any(|spec| spec.name == name);
        if !exposed {
            return Ok(tool_result(&format!("tool not found: {}", name), true));
        }

        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let output = self
            .registry
            .read()
            .await
            .execute(name, arguments, &self.ctx)
            .await;
        Ok(tool_result(&output.content, output.is_error))
    }
}

fn tool_result(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{"type": "text", "text": flatten(text)}],
        "isError": is_error,
    })
}

/// Keep each NDJSON response on one line.
fn flatten(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Tool, ToolOutput};
    use async_trait::async_trait;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }
        fn bridge_exposed(&self) -> bool {
            true
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            let text = args.get("text").and_then(|t| t.as_str()).unwrap_or("");
            Ok(ToolOutput::ok(text.to_uppercase()))
        }
    }

    struct HiddenTool;

    #[async_trait]
    impl Tool for HiddenTool {
        fn name(&self) -> &str {
            "hidden"
        }
        fn description(&self) -> &str {
            "Not on the bridge"
        }
        fn schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            Ok(ToolOutput::ok("secret"))
        }
    }

    fn bridge() -> McpBridge {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(UpperTool));
        registry.register(Box::new(HiddenTool));
        McpBridge::new(
            Arc::new(RwLock::new(registry)),
            ToolContext::default().with_channel("mcp", "host"),
        )
    }

    #[tokio::test]
    async fn test_initialize() {
        let bridge = bridge();
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .await
            .unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(response["result"]["serverInfo"]["name"], "bashclaw");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list_curated_only() {
        let bridge = bridge();
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "upper");
        assert!(tools[0]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tools_call_roundtrip() {
        let bridge = bridge();
        let response = bridge
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"upper","arguments":{"text":"hi"}}}"#,
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], false);
        assert_eq!(response["result"]["content"][0]["type"], "text");
        assert_eq!(response["result"]["content"][0]["text"], "HI");
    }

    #[tokio::test]
    async fn test_tools_call_invalid_name() {
        let bridge = bridge();
        let response = bridge
            .handle_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"bad-name!","arguments":{}}}"#,
            )
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_tools_call_non_curated_tool() {
        let bridge = bridge();
        let response = bridge
            .handle_line(
                r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"hidden","arguments":{}}}"#,
            )
            .await
            .unwrap();
        assert_eq!(response["result"]["isError"], true);
        assert!(response["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("tool not found"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let bridge = bridge();
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","id":6,"method":"sessions/wipe"}"#)
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let bridge = bridge();
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());

        // Unknown notification methods are also silent
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","method":"whatever"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let bridge = bridge();
        let response = bridge.handle_line("{torn").await.unwrap();
        assert_eq!(response["error"]["code"], PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_empty_lists() {
        let bridge = bridge();
        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(response["result"]["resources"], json!([]));

        let response = bridge
            .handle_line(r#"{"jsonrpc":"2.0","id":8,"method":"prompts/list"}"#)
            .await
            .unwrap();
        assert_eq!(response["result"]["prompts"], json!([]));
    }

    #[tokio::test]
    async fn test_serve_over_buffers() {
        let bridge = bridge();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"upper","arguments":{"text":"multi line"}}}"#,
            "\n",
        );
        let mut output: Vec<u8> = Vec::new();
        bridge
            .serve(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.trim_end().lines().collect();
        assert_eq!(lines.len(), 2);
        // Every response is itself valid single-line JSON
        for line in &lines {
            let value: Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["jsonrpc"], "2.0");
        }
    }

    #[test]
    fn test_flatten_newlines() {
        assert_eq!(flatten("a\nb\r\nc"), "a b  c");
    }

    #[test]
    fn test_tool_name_regex() {
        for good in ["memory", "web_fetch", "_private", "Tool2"] {
            assert!(tool_name_re().is_match(good), "{}", good);
        }
        for bad in ["", "2tool", "a-b", "a.b", "a b", "a/b"] {
            assert!(!tool_name_re().is_match(bad), "{}", bad);
        }
    }
}
