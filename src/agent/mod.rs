//! Agent runtime: the bounded tool loop.
//!
//! `run` drives one user message through INIT → PREPARE → CALL_MODEL →
//! DISPATCH_TOOLS → … → FINALIZE, persisting every step to the session log
//! before the next model call reads it back.

pub mod engine;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::{expand_tilde, Config, Engine};
use crate::error::Result;
use crate::protocol::{ChatMessage, ContentBlock, Role};
use crate::providers::{ChatRequest, ProviderClient};
use crate::session::{Entry, SessionStore};
use crate::tools::{truncate_result, ToolContext, ToolRegistry, RESULT_CAP_BYTES};

/// Default bound on model calls per run.
const DEFAULT_MAX_ITERS: u32 = 10;

/// Synthetic assistant text appended when the bound is hit with tools
/// still pending.
const BUDGET_NOTE: &str = "tool-loop budget exhausted";

/// Note appended to user text when image blocks are dropped.
const IMAGE_OMITTED_NOTE: &str = "[image omitted: model lacks vision]";

/// The agent runtime. One instance serves every agent id; per-request
/// state lives on the stack and in the session file.
pub struct AgentRuntime {
    config: Config,
    store: SessionStore,
    client: ProviderClient,
    registry: Arc<RwLock<ToolRegistry>>,
    state_dir: PathBuf,
}

impl AgentRuntime {
    pub fn new(config: Config, state_dir: PathBuf, client: ProviderClient) -> Self {
        let store = SessionStore::new(crate::config::sessions_dir(&state_dir));
        Self {
            config,
            store,
            client,
            registry: Arc::new(RwLock::new(ToolRegistry::new())),
            state_dir,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn registry(&self) -> Arc<RwLock<ToolRegistry>> {
        Arc::clone(&self.registry)
    }

    pub async fn register_tool(&self, tool: Box<dyn crate::tools::Tool>) {
        self.registry.write().await.register(tool);
    }

    /// Run one user message through an agent and return the reply text.
    pub async fn run(
        &self,
        agent_id: &str,
        user_text: &str,
        channel: &str,
        sender: &str,
    ) -> Result<String> {
        self.run_blocks(
            agent_id,
            vec![ContentBlock::text(user_text)],
            channel,
            sender,
        )
        .await
    }

    /// Run one user turn that may carry image blocks alongside text.
    pub async fn run_blocks(
        &self,
        agent_id: &str,
        blocks: Vec<ContentBlock>,
        channel: &str,
        sender: &str,
    ) -> Result<String> {
        // INIT: resolve config and engine.
        let settings = self.config.agent_settings(agent_id);
        let engine = match settings.engine {
            Engine::Auto => engine::resolve_auto(),
            other => other,
        };
        let session_path = self.store.path_for(
            &settings.agent_id,
            channel,
            sender,
            self.config.session.scope,
        );

        let user_text: String = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if engine != Engine::Builtin {
            info!(agent = %settings.agent_id, engine = ?engine, "delegating to external engine");
            let workspace = expand_tilde(&settings.workspace);
            return engine::run_external(engine, &self.store, &session_path, &user_text, &workspace)
                .await;
        }

        self.run_builtin(&settings, blocks, user_text, &session_path, channel, sender)
            .await
    }

    async fn run_builtin(
        &self,
        settings: &crate::config::AgentSettings,
        blocks: Vec<ContentBlock>,
        user_text: String,
        session_path: &Path,
        channel: &str,
        sender: &str,
    ) -> Result<String> {
        let model = resolve_model(&settings.model);
        let caps = catalog::capabilities(&model);

        // Vision: drop image blocks for models that cannot see them and
        // note the omission in the persisted text.
        let has_images = blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::Image { .. }));
        let (user_text, image_blocks) = if has_images && !caps.supports_vision {
            let text = if user_text.is_empty() {
                IMAGE_OMITTED_NOTE.to_string()
            } else {
                format!("{} {}", user_text, IMAGE_OMITTED_NOTE)
            };
            (text, Vec::new())
        } else {
            let images: Vec<ContentBlock> = blocks
                .into_iter()
                .filter(|b| matches!(b, ContentBlock::Image { .. }))
                .collect();
            (user_text, images)
        };

        // PREPARE: serialize on the session, apply idle reset, persist the
        // user turn, and project history into normalized messages.
        let _guard = self.store.lock(session_path)?;
        if self
            .store
            .check_idle_reset(session_path, self.config.session.idle_reset_minutes)?
        {
            info!(session = %session_path.display(), "idle reset cleared session");
        }
        self.store
            .append_locked(session_path, &Entry::user(&user_text))?;

        let max_history = self.config.session.max_history;
        let mut messages = self
            .store
            .load_as_messages(session_path, Some(max_history))?;
        if !image_blocks.is_empty() {
            // Images exist only in memory for this call; the session entry
            // carries the text.
            if let Some(last) = messages.last_mut() {
                if last.role == Role::User {
                    last.content.extend(image_blocks);
                }
            }
        }

        let (effective, tool_specs) = {
            let registry = self.registry.read().await;
            let effective = registry.effective_tools(
                &settings.profile,
                &settings.tool_allow,
                &settings.tool_deny,
            );
            let specs = if caps.supports_tools {
                registry.specs_for(&effective)
            } else {
                Vec::new()
            };
            (effective, specs)
        };

        let tool_ctx = ToolContext::new(self.state_dir.clone(), expand_tilde(&settings.workspace))
            .with_channel(channel, sender)
            .with_agent(&settings.agent_id);

        let budget = max_tool_iterations().max(1);
        let mut final_text = String::new();

        for round in 0..budget {
            // CALL_MODEL
            let request = ChatRequest {
                model: &model,
                system: &settings.system_prompt,
                messages: &messages,
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                tools: &tool_specs,
            };
            let response = match self.client.chat(&request).await {
                Ok(response) => response,
                Err(e) => {
                    // Retries are exhausted by the transport; surface the
                    // provider's message as the reply.
                    let text = e.to_string();
                    warn!(error = %text, "model call failed, ending turn");
                    self.store
                        .append_locked(session_path, &Entry::assistant(&text))?;
                    self.finalize(session_path, max_history)?;
                    return Ok(text);
                }
            };

            debug!(
                round,
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "model responded"
            );

            // Persist the assistant turn and any tool requests.
            let text = response.text();
            self.store
                .append_locked(session_path, &Entry::assistant(&text))?;
            let tool_uses: Vec<(String, String, serde_json::Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            for (id, name, input) in &tool_uses {
                self.store
                    .append_locked(session_path, &Entry::tool_call(name, input.clone(), id))?;
            }

            // Stop check.
            if tool_uses.is_empty() {
                final_text = text;
                break;
            }
            if round + 1 == budget {
                self.store
                    .append_locked(session_path, &Entry::assistant(BUDGET_NOTE))?;
                final_text = BUDGET_NOTE.to_string();
                break;
            }

            // DISPATCH_TOOLS: sequential, in order of appearance.
            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            if !text.is_empty() {
                assistant_blocks.push(ContentBlock::text(text));
            }
            let mut result_blocks: Vec<ContentBlock> = Vec::new();
            for (id, name, input) in &tool_uses {
                assistant_blocks.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });

                let output = if effective.iter().any(|n| n == name) {
                    let registry = self.registry.read().await;
                    registry.execute(name, input.clone(), &tool_ctx).await
                } else {
                    crate::tools::ToolOutput::error(format!(
                        "tool '{}' is not available to this agent",
                        name
                    ))
                };

                let content = truncate_result(&output.content, RESULT_CAP_BYTES);
                self.store.append_locked(
                    session_path,
                    &Entry::tool_result(id, &content, output.is_error),
                )?;
                result_blocks.push(ContentBlock::tool_result(id, content, output.is_error));
            }

            // The next model call sees exactly what was persisted.
            messages.push(ChatMessage {
                role: Role::Assistant,
                content: assistant_blocks,
            });
            messages.push(ChatMessage::tool_results(result_blocks));
        }

        // FINALIZE
        self.finalize(session_path, max_history)?;
        Ok(final_text)
    }

    fn finalize(&self, session_path: &Path, max_history: usize) -> Result<()> {
        let count = self.store.load(session_path, None)?.len();
        if count > max_history {
            self.store.prune_locked(session_path, max_history)?;
        }
        Ok(())
    }
}

/// Model resolution: the `MODEL_ID` environment override wins over the
/// per-agent (and default) configuration.
fn resolve_model(configured: &str) -> String {
    if let Ok(model) = std::env::var("MODEL_ID") {
        if !model.trim().is_empty() {
            return model.trim().to_string();
        }
    }
    configured.to_string()
}

/// The tool-loop bound: `AGENT_MAX_TOOL_ITERATIONS` or the default.
fn max_tool_iterations() -> u32 {
    std::env::var("AGENT_MAX_TOOL_ITERATIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_ITERS)
}
