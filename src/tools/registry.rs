//! Tool registry: lookup, dispatch, and the per-agent visibility policy.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::providers::ToolSpec;

use super::{Tool, ToolContext, ToolOutput};

/// Cap on tool result content fed back to the model.
pub const RESULT_CAP_BYTES: usize = 16 * 1024;

/// Named tool profiles. `full` means every non-optional tool.
fn profile_tools(profile: &str) -> Option<&'static [&'static str]> {
    match profile {
        "coding" => Some(&[
            "read_file",
            "write_file",
            "list_files",
            "file_search",
            "shell",
            "memory",
            "spawn",
            "spawn_status",
        ]),
        "minimal" => Some(&["memory"]),
        _ => None,
    }
}

/// Registry mapping tool names to implementations.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool, replacing any existing tool of the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        info!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// The effective tool set for an agent:
    /// `(profile ∪ allow) \ deny \ unavailable`.
    ///
    /// Non-optional tools come in through the profile even with an empty
    /// allow list; optional tools need an explicit allow.
    pub fn effective_tools(&self, profile: &str, allow: &[String], deny: &[String]) -> Vec<String> {
        let mut set: BTreeSet<String> = BTreeSet::new();

        match profile_tools(profile) {
            Some(names) => {
                for name in names {
                    if self.has(name) {
                        set.insert((*name).to_string());
                    }
                }
            }
            None => {
                if profile != "full" {
                    warn!(profile, "unknown tool profile, treating as 'full'");
                }
                for (name, tool) in &self.tools {
                    if !tool.optional() {
                        set.insert(name.clone());
                    }
                }
            }
        }

        for name in allow {
            if self.has(name) {
                set.insert(name.clone());
            }
        }
        for name in deny {
            set.remove(name);
        }
        set.retain(|name| self.get(name).map(|t| t.available()).unwrap_or(false));

        set.into_iter().collect()
    }

    /// Provider-facing specs for the given tool names.
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        names
            .iter()
            .filter_map(|name| self.get(name))
            .map(|t| ToolSpec::new(t.name(), t.description(), t.schema()))
            .collect()
    }

    /// Specs for every tool exposed over the MCP bridge.
    pub fn bridge_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .filter(|t| t.bridge_exposed() && t.available())
            .map(|t| ToolSpec::new(t.name(), t.description(), t.schema()))
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Dispatch one tool invocation.
    ///
    /// Missing tools, schema mismatches, and handler faults all come back
    /// as error outputs so the model loop can continue.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutput {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutput::error(format!("tool not found: {}", name));
        };

        if let Err(reason) = validate_shape(&tool.schema(), &args) {
            return ToolOutput::error(format!("argument error for {}: {}", name, reason));
        }

        let start = Instant::now();
        match tool.execute(args, ctx).await {
            Ok(output) => {
                info!(
                    tool = name,
                    is_error = output.is_error,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "tool executed"
                );
                output
            }
            Err(e) => {
                error!(
                    tool = name,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "tool execution failed"
                );
                ToolOutput::error(e.to_string())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shape-only validation of tool input against its JSON schema: the input
/// must be an object, required keys must be present, and present keys with
/// a declared primitive type must match it.
pub fn validate_shape(schema: &Value, args: &Value) -> std::result::Result<(), String> {
    let Some(args_map) = args.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !args_map.contains_key(key) {
                return Err(format!("missing required field '{}'", key));
            }
        }
    }

    if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
        for (key, value) in args_map {
            let Some(declared) = props.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            let Some(declared) = declared.as_str() else {
                continue;
            };
            let ok = match declared {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !ok && !value.is_null() {
                return Err(format!("field '{}' must be a {}", key, declared));
            }
        }
    }

    Ok(())
}

/// Truncate tool result content to `cap` bytes on a char boundary, with an
/// explicit marker when anything was dropped.
pub fn truncate_result(content: &str, cap: usize) -> String {
    if content.len() <= cap {
        return content.to_string();
    }
    let mut end = cap;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated {} bytes]",
        &content[..end],
        content.len() - end
    )
}
