//! Interactive terminal frontend over the agent loop.
//!
//! Renders [`LoopEvent`]s as they arrive, prompts for tool approvals, and
//! handles slash commands. Ctrl-C during a run cancels it instead of
//! exiting the program.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tracing::debug;

use quill_core::agent::{AgentLoop, Conversation};
use quill_core::permissions::ApprovalDecision;
use quill_core::tools::ActionKind;
use quill_core::{LoopEvent, LoopInput, McpManager, SessionStore};

const HELP: &str = "\
Commands:
  /help              show this help
  /reset             clear the conversation and session grants
  /compact           summarize older history now
  /model [name]      show or switch the model
  /status            model, history size, grants, MCP servers
  /save [name]       save the conversation
  /load <name>       load a saved conversation
  /sessions          list saved conversations
  /delete <name>     delete a saved conversation
  /auto [tool|on|off]  auto-approve one tool, everything, or nothing
  /quit              exit

Anything else is sent to the model. Ctrl-C cancels a running turn.";

type InputLines = Lines<BufReader<Stdin>>;

pub struct Repl {
    agent: Arc<AgentLoop>,
    conversation: Arc<Mutex<Conversation>>,
    store: SessionStore,
    mcp: Option<Arc<McpManager>>,
    prompt_tokens: usize,
    completion_tokens: usize,
}

impl Repl {
    pub fn new(
        agent: Arc<AgentLoop>,
        conversation: Arc<Mutex<Conversation>>,
        mcp: Option<Arc<McpManager>>,
    ) -> Self {
        Self {
            agent,
            conversation,
            store: SessionStore::default(),
            mcp,
            prompt_tokens: 0,
            completion_tokens: 0,
        }
    }

    /// Send one prompt, render the run, and return.
    pub async fn run_once(&mut self, prompt: &str) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.conversation.lock().await.push_user_text(prompt);
        self.run_turn(&mut lines).await
    }

    pub async fn run_interactive(&mut self) -> Result<()> {
        println!("quill {} ({})", env!("CARGO_PKG_VERSION"), self.agent.options().model);
        println!("Type /help for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("\n› ");
            std::io::stdout().flush()?;

            let Some(line) = lines.next_line().await? else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(command) = line.strip_prefix('/') {
                if !self.handle_command(command).await? {
                    break;
                }
                continue;
            }

            self.conversation.lock().await.push_user_text(line);
            self.run_turn(&mut lines).await?;
        }

        Ok(())
    }

    /// Returns false when the REPL should exit.
    async fn handle_command(&mut self, command: &str) -> Result<bool> {
        let mut parts = command.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("");
        let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match name {
            "help" => println!("{HELP}"),
            "quit" | "exit" => return Ok(false),
            "reset" => {
                self.conversation.lock().await.clear();
                self.agent.permissions().reset_session();
                println!("Conversation cleared.");
            }
            "compact" => {
                let mut conversation = self.conversation.lock().await;
                match self.agent.compact_now(&mut conversation).await {
                    Ok((before, after)) if after < before => {
                        println!("Compacted {before} messages down to {after}.");
                    }
                    Ok(_) => println!("Nothing to compact."),
                    Err(e) => println!("Compaction failed: {e}"),
                }
            }
            "model" => match arg {
                Some(model) => match Arc::get_mut(&mut self.agent) {
                    Some(agent) => {
                        agent.set_model(model);
                        println!("Model set to {model}.");
                    }
                    None => println!("Cannot change the model while a run is active."),
                },
                None => println!("Model: {}", self.agent.options().model),
            },
            "status" => self.print_status().await,
            "save" => {
                let conversation = self.conversation.lock().await;
                let model = self.agent.options().model.clone();
                match self.store.save(arg, &model, conversation.messages()) {
                    Ok(name) => println!("Saved as '{name}'."),
                    Err(e) => println!("Save failed: {e}"),
                }
            }
            "load" => match arg {
                Some(session_name) => match self.store.load(session_name) {
                    Ok(saved) => {
                        let count = saved.messages.len();
                        let mut conversation = self.conversation.lock().await;
                        conversation.clear();
                        for message in saved.messages {
                            conversation.push(message);
                        }
                        if let Some(agent) = Arc::get_mut(&mut self.agent) {
                            agent.set_model(&saved.model);
                        }
                        println!("Loaded '{session_name}' ({count} messages, model {}).", saved.model);
                    }
                    Err(e) => println!("{e}"),
                },
                None => println!("Usage: /load <name>"),
            },
            "sessions" => match self.store.list() {
                Ok(sessions) if sessions.is_empty() => println!("No saved sessions."),
                Ok(sessions) => {
                    for session in sessions {
                        println!(
                            "  {}  {} messages, updated {}",
                            session.name,
                            session.message_count,
                            session.updated_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                Err(e) => println!("Could not list sessions: {e}"),
            },
            "delete" => match arg {
                Some(session_name) => match self.store.delete(session_name) {
                    Ok(()) => println!("Deleted '{session_name}'."),
                    Err(e) => println!("{e}"),
                },
                None => println!("Usage: /delete <name>"),
            },
            "auto" => {
                let permissions = self.agent.permissions();
                match arg {
                    Some("off") => {
                        permissions.reset_session();
                        println!("Auto-approval off.");
                    }
                    Some("on") | None => {
                        for kind in ActionKind::all().iter().copied() {
                            permissions.grant_session(kind);
                        }
                        println!("Auto-approving all tool kinds for this session.");
                    }
                    Some(tool) => match ActionKind::from_tool_name(tool) {
                        Some(kind) => {
                            permissions.grant_session(kind);
                            println!("Auto-approving {tool} for this session.");
                        }
                        None => println!("Unknown tool '{tool}': use a tool name, on, or off."),
                    },
                }
            }
            other => println!("Unknown command /{other}. Type /help for commands."),
        }

        Ok(true)
    }

    async fn print_status(&self) {
        let conversation = self.conversation.lock().await;
        println!("Model:     {}", self.agent.options().model);
        println!(
            "History:   {} messages (~{} tokens)",
            conversation.len(),
            conversation.estimated_tokens()
        );
        println!(
            "Usage:     {} prompt / {} completion tokens this session",
            self.prompt_tokens, self.completion_tokens
        );
        let grants = self.agent.permissions().session_grants();
        if grants.is_empty() {
            println!("Grants:    none");
        } else {
            let names: Vec<&str> = grants.iter().map(|k| k.tool_name()).collect();
            println!("Grants:    {}", names.join(", "));
        }
        if let Some(mcp) = &self.mcp {
            for server in mcp.list_servers().await {
                let state = if server.connected {
                    format!("connected, {} tools", server.tool_count)
                } else {
                    "disconnected".to_string()
                };
                println!("MCP:       {} ({state})", server.name);
            }
        }
    }

    /// Drive one run of the agent loop, rendering events until it finishes.
    async fn run_turn(&mut self, lines: &mut InputLines) -> Result<()> {
        let (mut event_rx, input_tx) = self.agent.run(Arc::clone(&self.conversation));

        // Names by tool call id, for result lines.
        let mut call_names: HashMap<String, String> = HashMap::new();
        let mut mid_text = false;

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    let _ = input_tx.send(LoopInput::Cancel);
                    println!("\n[cancelling]");
                    mid_text = false;
                    continue;
                }
            };

            match event {
                LoopEvent::TextDelta { delta } => {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                    mid_text = true;
                }
                LoopEvent::ToolCallStart { .. } => {}
                LoopEvent::ToolCallComplete {
                    id,
                    name,
                    arguments,
                } => {
                    end_text_line(&mut mid_text);
                    println!("→ {name} {}", summarize_args(&arguments));
                    call_names.insert(id, name);
                }
                LoopEvent::ToolApprovalRequired {
                    id,
                    name,
                    arguments,
                    diff,
                } => {
                    end_text_line(&mut mid_text);
                    let decision = self
                        .prompt_approval(lines, &name, &arguments, diff.as_deref())
                        .await?;
                    let _ = input_tx.send(LoopInput::Approval {
                        tool_call_id: id,
                        decision,
                    });
                }
                LoopEvent::ToolApproved { .. } => {}
                LoopEvent::ToolDenied { id, reason } => {
                    end_text_line(&mut mid_text);
                    let name = call_names.get(&id).map(String::as_str).unwrap_or("tool");
                    println!("✗ {name} denied: {reason}");
                }
                LoopEvent::ToolExecuting { .. } => {}
                LoopEvent::ToolOutputDelta { delta, .. } => {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                    mid_text = !delta.ends_with('\n');
                }
                LoopEvent::ToolResult {
                    id,
                    output,
                    is_error,
                } => {
                    end_text_line(&mut mid_text);
                    let name = call_names.get(&id).map(String::as_str).unwrap_or("tool");
                    if is_error {
                        println!("✗ {name}: {}", first_line(&output));
                    } else {
                        debug!(tool = name, "tool completed");
                    }
                }
                LoopEvent::SubagentStarted { name, kind } => {
                    end_text_line(&mut mid_text);
                    println!("⧉ subagent '{name}' ({kind}) started");
                }
                LoopEvent::SubagentFinished { name, success } => {
                    end_text_line(&mut mid_text);
                    let outcome = if success { "finished" } else { "failed" };
                    println!("⧉ subagent '{name}' {outcome}");
                }
                LoopEvent::Compacted {
                    messages_before,
                    messages_after,
                } => {
                    end_text_line(&mut mid_text);
                    println!("[compacted {messages_before} messages down to {messages_after}]");
                }
                LoopEvent::Usage {
                    prompt_tokens,
                    completion_tokens,
                } => {
                    self.prompt_tokens += prompt_tokens;
                    self.completion_tokens += completion_tokens;
                }
                LoopEvent::TurnComplete { .. } => {}
                LoopEvent::Error { error } => {
                    end_text_line(&mut mid_text);
                    println!("error: {error}");
                }
                LoopEvent::Finished { reason } => {
                    end_text_line(&mut mid_text);
                    use quill_core::CompletionReason::Completed;
                    if reason != Completed {
                        println!("[run {reason}]");
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    async fn prompt_approval(
        &self,
        lines: &mut InputLines,
        name: &str,
        arguments: &serde_json::Value,
        diff: Option<&str>,
    ) -> Result<ApprovalDecision> {
        println!("\n{name} wants to run:");
        println!("  {}", summarize_args(arguments));
        if let Some(diff) = diff {
            for line in diff.lines() {
                println!("  {line}");
            }
        }
        print!("Allow? [y]es / [N]o / [a]lways / [s]top > ");
        std::io::stdout().flush()?;

        let answer = lines.next_line().await?.unwrap_or_default();
        Ok(match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => ApprovalDecision::ApproveOnce,
            "a" | "always" => ApprovalDecision::ApproveForSession,
            "s" | "stop" => ApprovalDecision::Stop,
            _ => ApprovalDecision::Deny,
        })
    }
}

fn end_text_line(mid_text: &mut bool) {
    if *mid_text {
        println!();
        *mid_text = false;
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

/// One-line argument preview for tool call displays.
fn summarize_args(arguments: &serde_json::Value) -> String {
    let rendered = arguments.to_string();
    if rendered.chars().count() <= 120 {
        return rendered;
    }
    let clipped: String = rendered.chars().take(117).collect();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize_args_clips_long_values() {
        let long = "x".repeat(500);
        let summary = summarize_args(&json!({ "content": long }));
        assert!(summary.chars().count() <= 120);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_summarize_args_keeps_short_values() {
        let summary = summarize_args(&json!({ "path": "a.txt" }));
        assert_eq!(summary, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn test_first_line() {
        assert_eq!(first_line("one\ntwo"), "one");
        assert_eq!(first_line(""), "");
    }
}
