//! Filesystem tools: `read_file`, `write_file`, `list_files`,
//! `file_search`.
//!
//! Relative paths resolve against the workspace; any path whose normalized
//! form contains a `..` segment is rejected as traversal.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// Cap on file_search results.
const MAX_SEARCH_RESULTS: usize = 100;

/// Resolve a tool-supplied path against the workspace, rejecting `..`
/// segments.
fn resolve_path(ctx: &ToolContext, raw: &str) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(BashError::SecurityViolation(format!(
            "path traversal rejected: '{}'",
            raw
        )));
    }
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(ctx.workspace.join(path))
    }
}

fn path_arg<'a>(args: &'a Value) -> Result<&'a str> {
    args.get("path")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BashError::Tool("missing 'path' argument".into()))
}

/// Read a file's contents.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file and return its contents"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File path (workspace-relative or absolute)"}
            },
            "required": ["path"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = path_arg(&args)?;
        let path = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(ToolOutput::json(&json!({
                "content": content,
                "path": path.to_string_lossy(),
            }))),
            Err(e) => Ok(ToolOutput::error(format!(
                "cannot read '{}': {}",
                path.display(),
                e
            ))),
        }
    }
}

/// Write content to a file, creating parent directories.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Destination file path"},
                "content": {"type": "string", "description": "Content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = path_arg(&args)?;
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'content' argument".into()))?;

        let path = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(ToolOutput::json(&json!({"written": true})))
    }
}

/// List a directory's entries.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory path"}
            },
            "required": ["path"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = path_arg(&args)?;
        let path = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };
        if !path.is_dir() {
            return Ok(ToolOutput::error(format!(
                "not a directory: '{}'",
                path.display()
            )));
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if entry.path().is_dir() { "dir" } else { "file" };
            entries.push(json!({"name": name, "type": kind}));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        Ok(ToolOutput::json(&json!({
            "entries": entries,
            "count": entries.len(),
        })))
    }
}

/// Search files under a directory for a substring.
pub struct FileSearchTool;

#[async_trait]
impl Tool for FileSearchTool {
    fn name(&self) -> &str {
        "file_search"
    }

    fn description(&self) -> &str {
        "Search files under a directory for lines containing a string"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to search"},
                "content": {"type": "string", "description": "Substring to look for"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let raw = path_arg(&args)?;
        let needle = args
            .get("content")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BashError::Tool("missing 'content' argument".into()))?;

        let path = match resolve_path(ctx, raw) {
            Ok(p) => p,
            Err(e) => return Ok(ToolOutput::error(e.to_string())),
        };
        if !path.is_dir() {
            return Ok(ToolOutput::error(format!(
                "not a directory: '{}'",
                path.display()
            )));
        }

        let mut results = Vec::new();
        search_dir(&path, needle, &mut results)?;
        let count = results.len();
        Ok(ToolOutput::json(&json!({
            "results": results,
            "count": count,
        })))
    }
}

fn search_dir(dir: &Path, needle: &str, results: &mut Vec<Value>) -> Result<()> {
    if results.len() >= MAX_SEARCH_RESULTS {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            search_dir(&path, needle, results)?;
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            for (index, line) in content.lines().enumerate() {
                if line.contains(needle) {
                    results.push(json!({
                        "file": path.to_string_lossy(),
                        "line": index + 1,
                        "text": line.trim(),
                    }));
                    if results.len() >= MAX_SEARCH_RESULTS {
                        return Ok(());
                    }
                }
            }
        }
    }
    Ok(())
}
