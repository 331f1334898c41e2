//! Tools: the registry, dispatcher, and built-in tool implementations.

pub mod cron;
pub mod filesystem;
pub mod introspect;
pub mod memory;
pub mod message;
mod registry;
pub mod shell;
pub mod spawn;
mod types;
pub mod web;

pub use registry::{truncate_result, validate_shape, ToolRegistry, RESULT_CAP_BYTES};
pub use types::{Tool, ToolContext, ToolOutput};

use std::sync::{Arc, Weak};

use crate::agent::AgentRuntime;

/// Register the built-in tool set against a runtime.
///
/// The runtime handle is weak so tools never keep the runtime alive; dead
/// handles degrade into tool errors.
pub async fn register_builtin_tools(runtime: &Arc<AgentRuntime>) {
    let weak: Weak<AgentRuntime> = Arc::downgrade(runtime);
    let outbox = Arc::new(message::FileOutbox::new(runtime.state_dir()));

    runtime.register_tool(Box::new(web::WebFetchTool::new())).await;
    runtime.register_tool(Box::new(web::WebSearchTool::new())).await;
    runtime.register_tool(Box::new(shell::ShellTool)).await;
    runtime.register_tool(Box::new(memory::MemoryTool)).await;
    runtime.register_tool(Box::new(cron::CronTool)).await;
    runtime
        .register_tool(Box::new(message::MessageTool::new(outbox)))
        .await;
    runtime
        .register_tool(Box::new(spawn::SpawnTool::new(weak.clone())))
        .await;
    runtime.register_tool(Box::new(spawn::SpawnStatusTool)).await;
    runtime.register_tool(Box::new(filesystem::ReadFileTool)).await;
    runtime.register_tool(Box::new(filesystem::WriteFileTool)).await;
    runtime.register_tool(Box::new(filesystem::ListFilesTool)).await;
    runtime.register_tool(Box::new(filesystem::FileSearchTool)).await;
    runtime
        .register_tool(Box::new(introspect::AgentsListTool::new(weak.clone())))
        .await;
    runtime
        .register_tool(Box::new(introspect::SessionsListTool::new(weak.clone())))
        .await;
    runtime
        .register_tool(Box::new(introspect::SessionStatusTool::new(weak.clone())))
        .await;
    runtime
        .register_tool(Box::new(introspect::AgentMessageTool::new(weak)))
        .await;
}
