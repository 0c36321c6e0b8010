//! Dispatches approved actions to their implementations.
//!
//! Dispatch is an exhaustive match over [`ActionKind`]. Shell commands manage
//! their own deadline; every other operation runs under the context timeout.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::mcp::McpManager;
use crate::tools::{ops, ActionKind, ToolContext, ToolResult};

/// Deadline for non-shell operations without a per-call override.
const DEFAULT_OP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

pub struct ActionExecutor {
    context: ToolContext,
    mcp: Option<Arc<McpManager>>,
}

impl ActionExecutor {
    pub fn new(context: ToolContext) -> Self {
        Self { context, mcp: None }
    }

    pub fn with_mcp(mut self, mcp: Arc<McpManager>) -> Self {
        self.mcp = Some(mcp);
        self
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// Execute a tool call by its wire name.
    ///
    /// Delegation is not handled here; the agent loop intercepts
    /// `delegate_task` before dispatch because subagents need loop state the
    /// executor does not hold.
    pub async fn execute(&self, tool_name: &str, params: Value) -> ToolResult {
        self.execute_in(&self.context, tool_name, params).await
    }

    /// Execute with live output forwarded over `output_tx` (shell commands
    /// stream their stdout/stderr as it arrives).
    pub async fn execute_streaming(
        &self,
        tool_name: &str,
        params: Value,
        output_tx: tokio::sync::mpsc::UnboundedSender<crate::tools::ToolOutputChunk>,
        tool_use_id: String,
    ) -> ToolResult {
        let ctx = self.context.clone().with_output_stream(output_tx, tool_use_id);
        self.execute_in(&ctx, tool_name, params).await
    }

    async fn execute_in(&self, ctx: &ToolContext, tool_name: &str, params: Value) -> ToolResult {
        let Some(kind) = ActionKind::from_tool_name(tool_name) else {
            return ToolResult::error_with_code(
                "unknown_tool",
                format!("Unknown tool: {tool_name}"),
            );
        };
        debug!(tool = tool_name, "executing action");

        match kind {
            ActionKind::ExecuteCommand => ops::shell::execute_command(params, ctx).await,
            ActionKind::McpTool => self.execute_mcp(tool_name, params).await,
            ActionKind::DelegateTask => ToolResult::error_with_code(
                "tool_error",
                "delegate_task must be dispatched by the agent loop",
            ),
            _ => {
                let fut = async {
                    match kind {
                        ActionKind::ReadFile => ops::read::read_file(params, ctx).await,
                        ActionKind::ReadManyFiles => ops::read::read_files(params, ctx).await,
                        ActionKind::WriteFile => ops::write::write_file(params, ctx).await,
                        ActionKind::EditFile => ops::edit::edit_file(params, ctx).await,
                        ActionKind::DeleteFile => ops::fsmeta::delete_file(params, ctx).await,
                        ActionKind::ListDirectory => ops::list::list_directory(params, ctx).await,
                        ActionKind::CreateDirectory => {
                            ops::fsmeta::create_directory(params, ctx).await
                        }
                        ActionKind::SearchFiles => ops::search::search_files(params, ctx).await,
                        ActionKind::Grep => ops::search::grep(params, ctx).await,
                        ActionKind::FileInfo => ops::fsmeta::file_info(params, ctx).await,
                        ActionKind::ExecuteCommand
                        | ActionKind::DelegateTask
                        | ActionKind::McpTool => unreachable!("handled above"),
                    }
                };
                let deadline = ctx.timeout.unwrap_or(DEFAULT_OP_TIMEOUT);
                match tokio::time::timeout(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => ToolResult::error_with_code(
                        "timeout",
                        format!(
                            "{tool_name} timed out after {} seconds",
                            deadline.as_secs()
                        ),
                    ),
                }
            }
        }
    }

    async fn execute_mcp(&self, tool_name: &str, params: Value) -> ToolResult {
        let Some(mcp) = &self.mcp else {
            return ToolResult::error_with_code(
                "unknown_tool",
                format!("No MCP servers connected, cannot call {tool_name}"),
            );
        };
        mcp.call_tool(tool_name, params).await
    }
}
