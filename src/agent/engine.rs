//! External engine delegation: drive a turn through the `claude` or
//! `codex` CLI instead of the builtin tool loop.
//!
//! The user message is wrapped in a `<bashclaw-context>` envelope that
//! enumerates the bashclaw sub-commands the external agent may call back
//! into. The CLI is expected to emit a single JSON object on stdout;
//! `session_id` is persisted as session meta so later turns resume.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Engine;
use crate::error::{BashError, Result};
use crate::session::{Entry, SessionStore};

/// Wall-clock cap on one external engine invocation.
const ENGINE_TIMEOUT_SECS: u64 = 300;

/// Session meta key carrying the external engine's session id.
pub const META_SESSION_ID: &str = "cc_session_id";

#[derive(Debug, Default, Deserialize)]
struct EngineResult {
    #[serde(default)]
    result: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    usage: Option<serde_json::Value>,
}

/// The CLI binary for an external engine.
fn binary_name(engine: Engine) -> Option<&'static str> {
    match engine {
        Engine::Claude => Some("claude"),
        Engine::Codex => Some("codex"),
        Engine::Builtin | Engine::Auto => None,
    }
}

/// Whether a binary is reachable on PATH.
pub fn binary_on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}

/// Resolve `auto` to a concrete engine: prefer `claude`, then `codex`,
/// falling back to the builtin loop.
pub fn resolve_auto() -> Engine {
    if binary_on_path("claude") {
        Engine::Claude
    } else if binary_on_path("codex") {
        Engine::Codex
    } else {
        Engine::Builtin
    }
}

/// Wrap the user message in the context envelope the external agent sees.
fn wrap_prompt(user_text: &str) -> String {
    format!(
        "<bashclaw-context>\n\
         You are answering on behalf of a bashclaw agent. The bashclaw CLI is \
         available for state access:\n\
         - bashclaw agent -m \"<message>\" (ask another agent)\n\
         - bashclaw sessions list\n\
         - bashclaw sessions clear <session>\n\
         Reply with the final answer for the user.\n\
         </bashclaw-context>\n\n{}",
        user_text
    )
}

/// Run one delegated turn. Appends the user entry, invokes the CLI, and
/// persists the assistant reply plus resume metadata.
///
/// Invalid JSON or empty output from the CLI yields an empty reply without
/// surfacing an error to the caller.
pub async fn run_external(
    engine: Engine,
    store: &SessionStore,
    session_path: &Path,
    user_text: &str,
    workspace: &Path,
) -> Result<String> {
    let binary =
        binary_name(engine).ok_or_else(|| BashError::Engine("not an external engine".into()))?;
    if !binary_on_path(binary) {
        return Err(BashError::Engine(format!(
            "engine binary '{}' not found on PATH",
            binary
        )));
    }

    let _guard = store.lock(session_path)?;
    store.append_locked(session_path, &Entry::user(user_text))?;
    let resume_id = store.meta_get(session_path, META_SESSION_ID)?;

    let prompt = wrap_prompt(user_text);
    let mut cmd = Command::new(binary);
    cmd.arg("-p")
        .arg(&prompt)
        .arg("--output-format")
        .arg("json")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(id) = &resume_id {
        cmd.arg("--resume").arg(id);
    }
    if workspace.is_dir() {
        cmd.current_dir(workspace);
    }

    let child = cmd
        .spawn()
        .map_err(|e| BashError::Engine(format!("failed to spawn '{}': {}", binary, e)))?;
    let output = tokio::time::timeout(
        Duration::from_secs(ENGINE_TIMEOUT_SECS),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| BashError::Engine(format!("engine '{}' timed out", binary)))?
    .map_err(|e| BashError::Engine(format!("engine '{}' failed: {}", binary, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = parse_engine_output(&stdout);

    if parsed.is_error {
        warn!(engine = binary, "external engine reported an error result");
    }
    if let Some(usage) = &parsed.usage {
        debug!(engine = binary, usage = %usage, "external engine usage");
    }
    if let Some(session_id) = &parsed.session_id {
        if resume_id.as_deref() != Some(session_id) {
            store.append_locked(session_path, &Entry::meta(META_SESSION_ID, session_id))?;
        }
    }

    store.append_locked(session_path, &Entry::assistant(&parsed.result))?;
    Ok(parsed.result)
}

/// Extract the result object from CLI stdout: the whole output as JSON, or
/// the last line that parses. Anything else decodes to the empty result.
fn parse_engine_output(stdout: &str) -> EngineResult {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return EngineResult::default();
    }
    if let Ok(parsed) = serde_json::from_str::<EngineResult>(trimmed) {
        return parsed;
    }
    for line in trimmed.lines().rev() {
        if let Ok(parsed) = serde_json::from_str::<EngineResult>(line.trim()) {
            return parsed;
        }
    }
    EngineResult::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_names() {
        assert_eq!(binary_name(Engine::Claude), Some("claude"));
        assert_eq!(binary_name(Engine::Codex), Some("codex"));
        assert_eq!(binary_name(Engine::Builtin), None);
    }

    #[test]
    fn test_binary_on_path_finds_sh() {
        assert!(binary_on_path("sh"));
        assert!(!binary_on_path("bashclaw-no-such-binary-xyz"));
    }

    #[test]
    fn test_wrap_prompt_envelope() {
        let prompt = wrap_prompt("do the thing");
        assert!(prompt.starts_with("<bashclaw-context>"));
        assert!(prompt.contains("</bashclaw-context>"));
        assert!(prompt.ends_with("do the thing"));
        assert!(prompt.contains("bashclaw agent -m"));
    }

    #[test]
    fn test_parse_engine_output_full_json() {
        let parsed = parse_engine_output(
            r#"{"result": "done", "session_id": "s-9", "is_error": false}"#,
        );
        assert_eq!(parsed.result, "done");
        assert_eq!(parsed.session_id.as_deref(), Some("s-9"));
        assert!(!parsed.is_error);
    }

    #[test]
    fn test_parse_engine_output_last_line() {
        let stdout = "progress line\nanother\n{\"result\": \"final\"}\n";
        let parsed = parse_engine_output(stdout);
        assert_eq!(parsed.result, "final");
    }

    #[test]
    fn test_parse_engine_output_garbage_is_empty() {
        let parsed = parse_engine_output("not json at all");
        assert_eq!(parsed.result, "");
        assert!(!parsed.is_error);

        let parsed = parse_engine_output("");
        assert_eq!(parsed.result, "");
    }

    #[tokio::test]
    async fn test_run_external_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf());
        let path = dir.path().join("s.jsonl");

        // Engine::Codex binary will not exist in the test environment as a
        // rule; when it does, this test is vacuous.
        if binary_on_path("codex") {
            return;
        }
        let err = run_external(Engine::Codex, &store, &path, "hi", dir.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found on PATH"));
    }
}
