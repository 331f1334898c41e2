//! Configuration type definitions.
//!
//! All types implement serde with camelCase keys to match the on-disk
//! config grammar. Unknown keys are ignored; missing keys fall back to
//! defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Agent configuration: defaults plus named per-agent entries.
    pub agents: AgentsConfig,
    /// Session partitioning and retention.
    pub session: SessionConfig,
}

/// Agent configuration block: `defaults` plus arbitrary named agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
    /// Named agent entries (`agents.<id>`); each inherits missing fields
    /// from `defaults`.
    #[serde(flatten)]
    pub named: HashMap<String, AgentOverrides>,
}

/// Fully-populated default agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentDefaults {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Explicitly allowed tools (in addition to the profile set).
    pub tools: Vec<String>,
    /// Explicitly denied tools (removed after allow/profile union).
    pub tools_deny: Vec<String>,
    pub engine: Engine,
    /// Named tool profile (`coding`, `minimal`, `full`).
    pub profile: String,
    /// Workspace directory for file tools and shell commands.
    pub workspace: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: crate::catalog::DEFAULT_MODEL.to_string(),
            system_prompt: "You are bashclaw, a helpful personal assistant.".to_string(),
            max_tokens: 8192,
            temperature: 0.7,
            tools: Vec::new(),
            tools_deny: Vec::new(),
            engine: Engine::Builtin,
            profile: "full".to_string(),
            workspace: "~/.bashclaw/workspace".to_string(),
        }
    }
}

/// Per-agent overrides; every field optional, inheriting from defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentOverrides {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Option<Vec<String>>,
    pub tools_deny: Option<Vec<String>>,
    pub engine: Option<Engine>,
    pub profile: Option<String>,
    pub workspace: Option<String>,
}

/// Resolved settings for one agent after merging defaults.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub agent_id: String,
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_allow: Vec<String>,
    pub tool_deny: Vec<String>,
    pub engine: Engine,
    pub profile: String,
    pub workspace: String,
}

/// The driver that executes an agent turn.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// The built-in tool loop.
    #[default]
    Builtin,
    /// Delegate to the `claude` CLI.
    Claude,
    /// Delegate to the `codex` CLI.
    Codex,
    /// Pick an external CLI when one is installed, builtin otherwise.
    Auto,
}

/// Session partitioning strategy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionScope {
    #[default]
    PerSender,
    PerChannel,
    Global,
}

/// Session retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    pub scope: SessionScope,
    /// Maximum entries kept per session file; older entries are pruned.
    pub max_history: usize,
    /// Idle minutes after which a session is cleared on next use.
    /// Zero or negative disables idle reset.
    pub idle_reset_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scope: SessionScope::PerSender,
            max_history: 50,
            idle_reset_minutes: 0,
        }
    }
}

impl Config {
    /// Resolve the effective settings for an agent.
    ///
    /// Unknown agent ids fall back to `main`, then to bare defaults.
    pub fn agent_settings(&self, agent_id: &str) -> AgentSettings {
        let entry = self
            .agents
            .named
            .get(agent_id)
            .or_else(|| self.agents.named.get("main"));
        let d = &self.agents.defaults;
        let o = entry.cloned().unwrap_or_default();

        AgentSettings {
            agent_id: if self.agents.named.contains_key(agent_id) {
                agent_id.to_string()
            } else {
                "main".to_string()
            },
            model: o.model.unwrap_or_else(|| d.model.clone()),
            system_prompt: o.system_prompt.unwrap_or_else(|| d.system_prompt.clone()),
            max_tokens: o.max_tokens.unwrap_or(d.max_tokens),
            temperature: o.temperature.unwrap_or(d.temperature),
            tool_allow: o.tools.unwrap_or_else(|| d.tools.clone()),
            tool_deny: o.tools_deny.unwrap_or_else(|| d.tools_deny.clone()),
            engine: o.engine.unwrap_or(d.engine),
            profile: o.profile.unwrap_or_else(|| d.profile.clone()),
            workspace: o.workspace.unwrap_or_else(|| d.workspace.clone()),
        }
    }

    /// Names of all configured agents (always includes `main`).
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.named.keys().cloned().collect();
        if !ids.iter().any(|i| i == "main") {
            ids.push("main".to_string());
        }
        ids.sort();
        ids
    }
}
