//! Persistent key-value memory tool.
//!
//! Each key lives in its own `memory/<key>.json` file as
//! `{value, updated_at}`; writes go through lock-then-rename so concurrent
//! runs never interleave.

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Serialize, Deserialize)]
struct MemoryRecord {
    value: String,
    /// Epoch milliseconds of the last write.
    updated_at: i64,
}

/// The `memory` tool: set/get/delete/list/search over the memory directory.
pub struct MemoryTool;

impl MemoryTool {
    fn dir(ctx: &ToolContext) -> PathBuf {
        crate::config::memory_dir(&ctx.state_dir)
    }

    fn key_path(dir: &Path, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.starts_with('.')
        {
            return Err(BashError::Tool(format!("invalid memory key '{}'", key)));
        }
        Ok(dir.join(format!("{}.json", key)))
    }

    fn write_record(dir: &Path, key: &str, value: &str) -> Result<MemoryRecord> {
        std::fs::create_dir_all(dir)?;
        let path = Self::key_path(dir, key)?;

        let lock_path = dir.join(".lock");
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.lock_exclusive()
            .map_err(|e| BashError::Tool(format!("memory lock failed: {}", e)))?;

        let record = MemoryRecord {
            value: value.to_string(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&record)?)?;
        std::fs::rename(&tmp, &path)?;

        let _ = lock.unlock();
        Ok(record)
    }

    fn read_record(dir: &Path, key: &str) -> Result<Option<MemoryRecord>> {
        let path = Self::key_path(dir, key)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn list_keys(dir: &Path) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if dir.exists() {
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        keys.push(stem.to_string());
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    fn description(&self) -> &str {
        "Persistent key-value memory. Actions: set, get, delete, list, search."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["set", "get", "delete", "list", "search"],
                    "description": "Action to perform"
                },
                "key": {
                    "type": "string",
                    "description": "Memory key (set, get, delete)"
                },
                "value": {
                    "type": "string",
                    "description": "Value to store (set)"
                },
                "query": {
                    "type": "string",
                    "description": "Substring to search for (search)"
                }
            },
            "required": ["action"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let action = args
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'action' argument".into()))?;
        let dir = Self::dir(ctx);

        let key_arg = || -> Result<&str> {
            args.get("key")
                .and_then(|v| v.as_str())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| BashError::Tool(format!("memory {} requires 'key'", action)))
        };

        match action {
            "set" => {
                let key = key_arg()?;
                let value = args
                    .get("value")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| BashError::Tool("memory set requires 'value'".into()))?;
                let record = Self::write_record(&dir, key, value)?;
                Ok(ToolOutput::json(&json!({
                    "key": key,
                    "stored": true,
                    "updated_at": record.updated_at,
                })))
            }
            "get" => {
                let key = key_arg()?;
                match Self::read_record(&dir, key)? {
                    Some(record) => Ok(ToolOutput::json(&json!({
                        "key": key,
                        "value": record.value,
                        "updated_at": record.updated_at,
                    }))),
                    None => Ok(ToolOutput::error(format!("no memory under key '{}'", key))),
                }
            }
            "delete" => {
                let key = key_arg()?;
                let path = Self::key_path(&dir, key)?;
                let existed = path.exists();
                if existed {
                    std::fs::remove_file(&path)?;
                }
                Ok(ToolOutput::json(&json!({"key": key, "deleted": existed})))
            }
            "list" => {
                let keys = Self::list_keys(&dir)?;
                Ok(ToolOutput::json(&json!({
                    "keys": keys,
                    "count": keys.len(),
                })))
            }
            "search" => {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .filter(|q| !q.is_empty())
                    .ok_or_else(|| BashError::Tool("memory search requires 'query'".into()))?;
                let needle = query.to_lowercase();
                let mut hits = Vec::new();
                for key in Self::list_keys(&dir)? {
                    if let Some(record) = Self::read_record(&dir, &key)? {
                        if key.to_lowercase().contains(&needle)
                            || record.value.to_lowercase().contains(&needle)
                        {
                            hits.push(json!({"key": key, "value": record.value}));
                        }
                    }
                }
                Ok(ToolOutput::json(&json!({
                    "query": query,
                    "results": hits,
                    "count": hits.len(),
                })))
            }
            other => Err(BashError::Tool(format!("unknown memory action '{}'", other))),
        }
    }
}
