//! Quill, an interactive coding agent for the terminal.
//!
//! Wires an OpenAI-compatible model client, the sandboxed tool executor,
//! permission checks, and optional MCP servers into the agent loop, then
//! hands control to the REPL (or a single prompt with `-p`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Mutex;

use quill_core::agent::{AgentConfig, AgentLoop, Conversation};
use quill_core::permissions::{PermissionManager, PermissionPolicy};
use quill_core::{ActionExecutor, ChatOptions, HttpChatClient, McpManager, ToolContext};

mod repl;

/// Quill - a coding agent in your terminal
#[derive(Parser)]
#[command(name = "quill", version)]
struct Cli {
    /// Send one prompt, print the response, and exit
    #[arg(short, long)]
    prompt: Option<String>,

    /// Model name
    #[arg(short, long, default_value = "gpt-4o", env = "QUILL_MODEL")]
    model: String,

    /// OpenAI-compatible API base URL
    #[arg(long, default_value = "https://api.openai.com/v1", env = "QUILL_BASE_URL")]
    base_url: String,

    /// API key (falls back to OPENAI_API_KEY)
    #[arg(long, env = "QUILL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Auto-approve every tool call that would otherwise prompt
    #[arg(short, long)]
    yes: bool,

    /// Cap on model/tool iterations per run
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Workspace directory (defaults to the current directory)
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Skip MCP server discovery even if .mcp.json exists
    #[arg(long)]
    no_mcp: bool,
}

const SYSTEM_PROMPT: &str = "You are Quill, a coding agent working in the user's workspace. \
    You can read, write, and edit files, search the codebase, run shell commands, and delegate \
    focused work to subagents with delegate_task. Paths are relative to the workspace root and \
    must stay inside it. Prefer small, verifiable steps: inspect before you modify, and report \
    what you changed. When a command or edit fails, read the error and adjust rather than \
    repeating the same call.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    let workdir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("workspace directory {} not found", workdir.display()))?;

    let api_key = cli.api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok());
    let client = Arc::new(HttpChatClient::new(&cli.base_url, api_key));

    let context = ToolContext::new(workdir.clone()).with_sandbox(workdir.clone());
    let mut executor = ActionExecutor::new(context);

    let mcp = if cli.no_mcp {
        None
    } else {
        connect_mcp(workdir.clone(), cli.yes).await
    };
    if let Some(mcp) = &mcp {
        executor = executor.with_mcp(Arc::clone(mcp));
    }

    let policy = PermissionPolicy::default().with_auto_approve_all(cli.yes);
    let permissions = Arc::new(PermissionManager::new(policy));

    let mut config = AgentConfig {
        options: ChatOptions {
            model: cli.model.clone(),
            ..ChatOptions::default()
        },
        ..AgentConfig::default()
    };
    if let Some(max) = cli.max_iterations {
        config.max_iterations = max;
    }

    let mut agent = AgentLoop::new(client, executor, permissions, config);
    if let Some(mcp) = &mcp {
        agent = agent.with_mcp(Arc::clone(mcp));
    }
    let agent = Arc::new(agent);

    let conversation = Arc::new(Mutex::new(Conversation::new(SYSTEM_PROMPT)));
    let mut repl = repl::Repl::new(agent, conversation, mcp);

    match &cli.prompt {
        Some(prompt) => repl.run_once(prompt).await,
        None => repl.run_interactive().await,
    }
}

/// Load `.mcp.json` from the workspace and connect its servers. Every
/// server needs explicit approval before its process is spawned, since a
/// connection runs whatever command the config names; `--yes` approves
/// all of them. Returns None when nothing is configured or approved.
async fn connect_mcp(workdir: PathBuf, approve_all: bool) -> Option<Arc<McpManager>> {
    let manager = McpManager::new(workdir);
    if let Err(e) = manager.load_config().await {
        eprintln!("warning: failed to load .mcp.json: {e}");
        return None;
    }
    if !manager.has_servers().await {
        return None;
    }

    let mut connected = false;
    for (name, command) in manager.server_commands().await {
        let approved =
            approve_all || confirm(&format!("Connect MCP server '{name}' ({command})? [y/N] "));
        if !approved {
            println!("  skipped MCP server '{name}'");
            continue;
        }
        match manager.connect(&name).await {
            Ok(()) => connected = true,
            Err(e) => eprintln!("warning: failed to connect MCP server '{name}': {e}"),
        }
    }

    if connected {
        Some(Arc::new(manager))
    } else {
        None
    }
}

/// Blocking yes/no prompt on stdin. Anything but an explicit yes is a no.
fn confirm(prompt: &str) -> bool {
    use std::io::Write;
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    is_affirmative(&answer)
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Log to ~/.quill/logs/quill.log so output never interleaves with the
/// REPL. `QUILL_LOG` sets the filter, defaulting to info.
fn init_logging() -> Result<()> {
    let log_dir = quill_core::paths::logs_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_file = std::fs::File::create(log_dir.join("quill.log"))
        .with_context(|| format!("failed to create log file in {}", log_dir.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("QUILL_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}
