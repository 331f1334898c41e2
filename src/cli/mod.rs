//! CLI entry points: thin glue over the library.
//!
//! The heavy lifting lives in the library crate; the CLI resolves config,
//! builds the runtime, and routes one command.

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::agent::AgentRuntime;
use crate::config::{self, Config};
use crate::mcp::McpBridge;
use crate::providers::ProviderClient;
use crate::tools::{register_builtin_tools, ToolContext};

#[derive(Parser)]
#[command(name = "bashclaw", version, about = "Multi-channel AI assistant gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message to an agent and print the reply
    Agent {
        /// Message text
        #[arg(short, long)]
        message: String,
        /// Agent id
        #[arg(long, default_value = "main")]
        agent: String,
        /// Sender identity for session scoping
        #[arg(long, default_value = "cli-user")]
        sender: String,
    },
    /// Serve the MCP bridge on stdio
    Mcp,
    /// Inspect sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List known sessions
    List,
    /// Clear one session (path as printed by `sessions list`)
    Clear { session: String },
}

async fn build_runtime() -> anyhow::Result<Arc<AgentRuntime>> {
    let state_dir = config::state_dir();
    config::load_dotenv(&state_dir);
    let config = Config::load()?;
    let runtime = Arc::new(AgentRuntime::new(
        config,
        state_dir,
        ProviderClient::new(),
    ));
    register_builtin_tools(&runtime).await;
    Ok(runtime)
}

/// Parse arguments and run one command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    crate::utils::logging::init_logging();

    match cli.command {
        Commands::Agent {
            message,
            agent,
            sender,
        } => {
            let runtime = build_runtime().await?;
            let reply = runtime.run(&agent, &message, "cli", &sender).await?;
            println!("{}", reply);
        }
        Commands::Mcp => {
            let runtime = build_runtime().await?;
            let ctx = ToolContext::new(
                runtime.state_dir().to_path_buf(),
                config::expand_tilde(&runtime.config().agents.defaults.workspace),
            )
            .with_channel("mcp", "host");
            let bridge = McpBridge::new(runtime.registry(), ctx);
            bridge.serve_stdio().await?;
        }
        Commands::Sessions { command } => {
            let runtime = build_runtime().await?;
            match command {
                SessionCommands::List => {
                    for session in runtime.store().list()? {
                        println!("{}", session);
                    }
                }
                SessionCommands::Clear { session } => {
                    anyhow::ensure!(!session.contains(".."), "invalid session path");
                    let path = runtime.store().root().join(&session);
                    runtime.store().clear(&path)?;
                    println!("cleared {}", session);
                }
            }
        }
    }
    Ok(())
}
