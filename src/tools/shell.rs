//! Shell tool: command execution behind a regex blocklist and a timeout.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Patterns rejected before execution. A blocklist is defense-in-depth, not
/// a sandbox; it catches the destructive classics.
const BLOCKED_PATTERNS: &[&str] = &[
    // rm -rf / in its flag permutations
    r"\brm\s+-[a-zA-Z]*r[a-zA-Z]*f?\s+/",
    // Filesystem creation over a device
    r"\bmkfs\b",
    // Raw dd reads onto anything
    r"\bdd\s+if=",
    // Fork bomb
    r":\(\)\s*\{\s*:\|:",
    // Writes to raw block devices
    r">\s*/dev/sd[a-z]",
    r">\s*/dev/nvme",
    r">\s*/dev/disk",
];

static BLOCKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// Check a command against the blocklist.
pub fn validate_command(command: &str) -> Result<()> {
    for pattern in BLOCKLIST.iter() {
        if pattern.is_match(command) {
            return Err(BashError::SecurityViolation(format!(
                "blocked: command matches prohibited pattern '{}'",
                pattern.as_str()
            )));
        }
    }
    Ok(())
}

/// Tool for executing shell commands via `sh -c`.
pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace and return its output and exit code"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 60)"
                }
            },
            "required": ["command"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BashError::Tool("missing 'command' argument".into()))?;

        if let Err(e) = validate_command(command) {
            return Ok(ToolOutput::error(e.to_string()));
        }

        let timeout_secs = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if ctx.workspace.is_dir() {
            cmd.current_dir(&ctx.workspace);
        }

        let child = cmd
            .spawn()
            .map_err(|e| BashError::Tool(format!("failed to spawn command: {}", e)))?;

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(result) => result.map_err(|e| BashError::Tool(format!("command failed: {}", e)))?,
            Err(_) => {
                return Ok(ToolOutput::error(format!(
                    "command timed out after {}s",
                    timeout_secs
                )));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("--- stderr ---\n");
            text.push_str(&stderr);
        }

        Ok(ToolOutput::json(&json!({
            "output": text,
            "exitCode": exit_code,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    #[tokio::test]
    async fn test_echo() {
        let out = ShellTool
            .execute(json!({"command": "echo hello"}), &ctx())
            .await
            .unwrap();
        assert!(!out.is_error);
        let value: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(value["output"].as_str().unwrap().trim(), "hello");
        assert_eq!(value["exitCode"], 0);
    }

    #[tokio::test]
    async fn test_exit_code_captured() {
        let out = ShellTool
            .execute(json!({"command": "exit 42"}), &ctx())
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(value["exitCode"], 42);
    }

    #[tokio::test]
    async fn test_stderr_captured() {
        let out = ShellTool
            .execute(json!({"command": "echo oops >&2"}), &ctx())
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out.content).unwrap();
        assert!(value["output"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn test_workspace_used_as_cwd() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("probe.txt"), "found").unwrap();
        let ctx = ToolContext {
            workspace: dir.path().to_path_buf(),
            ..Default::default()
        };
        let out = ShellTool
            .execute(json!({"command": "cat probe.txt"}), &ctx)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&out.content).unwrap();
        assert!(value["output"].as_str().unwrap().contains("found"));
    }

    #[tokio::test]
    async fn test_blocked_rm_rf_root() {
        let out = ShellTool
            .execute(json!({"command": "rm -rf /"}), &ctx())
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("blocked"));
    }

    #[tokio::test]
    async fn test_blocked_variants() {
        for command in [
            "rm -fr /home",
            "sudo rm -rf /var",
            "mkfs /dev/sda1",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            ":(){ :|:& };:",
            "echo x > /dev/sda",
            "cat junk > /dev/nvme0n1",
            "echo y >/dev/disk0",
        ] {
            let out = ShellTool
                .execute(json!({"command": command}), &ctx())
                .await
                .unwrap();
            assert!(out.is_error, "'{}' should be blocked", command);
            assert!(out.content.contains("blocked"), "'{}'", command);
        }
    }

    #[test]
    fn test_benign_commands_pass_validation() {
        for command in ["rm file.txt", "ls -la /tmp", "mkdir -p a/b", "grep -r x ."] {
            assert!(validate_command(command).is_ok(), "'{}'", command);
        }
    }

    #[tokio::test]
    async fn test_timeout_enforced() {
        let out = ShellTool
            .execute(json!({"command": "sleep 5", "timeout": 1}), &ctx())
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.content.contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let err = ShellTool.execute(json!({}), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("missing 'command'"));
    }

    #[test]
    fn test_schema_shape() {
        let schema = ShellTool.schema();
        assert_eq!(schema["required"][0], "command");
        assert!(schema["properties"]["timeout"].is_object());
    }
}
