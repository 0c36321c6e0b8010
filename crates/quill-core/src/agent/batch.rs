//! Executes a batch of tool calls with the approval workflow.
//!
//! Calls run sequentially in the order the model issued them, and every
//! call produces exactly one tool result so the conversation history stays
//! paired. Denials and rejections become error results rather than gaps.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ai::types::{AiToolCall, Content};
use crate::executor::ActionExecutor;
use crate::permissions::{ApprovalDecision, PermissionCheck, PermissionManager};
use crate::tools::{ActionKind, ToolContext, ToolOutputChunk, ToolResult};

use super::loop_events::{LoopEvent, LoopInput};
use super::subagent::SubagentManager;

const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

const DENIED_BY_POLICY: &str = "Action denied by policy";
const REJECTED_BY_USER: &str = "Action rejected by user";

pub(crate) struct BatchOutcome {
    pub results: Vec<Content>,
    /// The user asked to stop the whole run.
    pub interrupted: bool,
}

pub(crate) async fn execute_batch(
    tool_calls: &[AiToolCall],
    executor: &ActionExecutor,
    permissions: &PermissionManager,
    subagents: &SubagentManager,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    input_rx: &mut mpsc::UnboundedReceiver<LoopInput>,
) -> BatchOutcome {
    let mut results = Vec::with_capacity(tool_calls.len());
    let mut interrupted = false;
    let mut cancel_requested = false;

    for (index, call) in tool_calls.iter().enumerate() {
        let kind = ActionKind::from_tool_name(&call.name);

        let command = if kind == Some(ActionKind::ExecuteCommand) {
            call.arguments.get("command").and_then(|v| v.as_str())
        } else {
            None
        };

        let check = match kind {
            Some(kind) => permissions.check(kind, command),
            None => PermissionCheck::Allowed, // executor reports unknown_tool
        };

        match check {
            PermissionCheck::Denied(reason) => {
                let message = format!("{DENIED_BY_POLICY}: {reason}");
                let _ = event_tx.send(LoopEvent::ToolDenied {
                    id: call.id.clone(),
                    reason: reason.clone(),
                });
                push_result(
                    &mut results,
                    event_tx,
                    call,
                    ToolResult::error_with_code("permission_denied", message),
                );
                continue;
            }
            PermissionCheck::NeedsApproval => {
                let diff = approval_diff(executor.context(), kind, &call.arguments);
                let _ = event_tx.send(LoopEvent::ToolApprovalRequired {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    diff,
                });

                match wait_for_decision(&call.id, input_rx).await {
                    Decision::Approved => {
                        let _ = event_tx.send(LoopEvent::ToolApproved {
                            id: call.id.clone(),
                        });
                    }
                    Decision::ApprovedForSession => {
                        if let Some(kind) = kind {
                            permissions.grant_session(kind);
                        }
                        let _ = event_tx.send(LoopEvent::ToolApproved {
                            id: call.id.clone(),
                        });
                    }
                    Decision::Rejected => {
                        let _ = event_tx.send(LoopEvent::ToolDenied {
                            id: call.id.clone(),
                            reason: REJECTED_BY_USER.to_string(),
                        });
                        push_result(
                            &mut results,
                            event_tx,
                            call,
                            ToolResult::error(REJECTED_BY_USER),
                        );
                        continue;
                    }
                    Decision::Stop => {
                        interrupted = true;
                        // The rest of the batch is rejected so every call
                        // still has a result.
                        reject_calls(&tool_calls[index..], &mut results, event_tx);
                        break;
                    }
                    Decision::TimedOut => {
                        warn!(tool = %call.name, "approval timed out");
                        let _ = event_tx.send(LoopEvent::ToolDenied {
                            id: call.id.clone(),
                            reason: "approval timed out".to_string(),
                        });
                        push_result(
                            &mut results,
                            event_tx,
                            call,
                            ToolResult::error(format!(
                                "{REJECTED_BY_USER}: approval timed out after {} seconds",
                                APPROVAL_TIMEOUT.as_secs()
                            )),
                        );
                        continue;
                    }
                }
            }
            PermissionCheck::Allowed => {}
        }

        let _ = event_tx.send(LoopEvent::ToolExecuting {
            id: call.id.clone(),
            name: call.name.clone(),
        });

        let result = if kind == Some(ActionKind::DelegateTask) {
            run_delegation(subagents, call, event_tx, input_rx, &mut cancel_requested).await
        } else {
            run_with_streaming(executor, call, event_tx).await
        };

        push_result(&mut results, event_tx, call, result);

        // A cancel that arrived while this tool ran stops the batch here;
        // the remaining calls are rejected so every call has a result.
        if cancel_requested || drained_cancel(input_rx) {
            interrupted = true;
            reject_calls(&tool_calls[index + 1..], &mut results, event_tx);
            break;
        }
    }

    BatchOutcome {
        results,
        interrupted,
    }
}

/// Run a delegation while still listening for input, so a user cancel
/// reaches the subagents through their cancellation token instead of
/// waiting for the whole delegation to finish.
async fn run_delegation(
    subagents: &SubagentManager,
    call: &AiToolCall,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    input_rx: &mut mpsc::UnboundedReceiver<LoopInput>,
    cancel_requested: &mut bool,
) -> ToolResult {
    let cancel = CancellationToken::new();
    let delegate = subagents.handle_delegate(call.arguments.clone(), event_tx, &cancel);
    tokio::pin!(delegate);

    let mut input_open = true;
    loop {
        if !input_open {
            return delegate.await;
        }
        tokio::select! {
            result = &mut delegate => return result,
            input = input_rx.recv() => match input {
                Some(LoopInput::Cancel) => {
                    *cancel_requested = true;
                    cancel.cancel();
                }
                Some(_) => {} // stale approval
                None => input_open = false,
            },
        }
    }
}

/// Reject every call in `calls` with a user-interrupt result.
fn reject_calls(
    calls: &[AiToolCall],
    results: &mut Vec<Content>,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
) {
    for call in calls {
        let _ = event_tx.send(LoopEvent::ToolDenied {
            id: call.id.clone(),
            reason: REJECTED_BY_USER.to_string(),
        });
        push_result(results, event_tx, call, ToolResult::error(REJECTED_BY_USER));
    }
}

fn drained_cancel(input_rx: &mut mpsc::UnboundedReceiver<LoopInput>) -> bool {
    let mut cancelled = false;
    while let Ok(input) = input_rx.try_recv() {
        if matches!(input, LoopInput::Cancel) {
            cancelled = true;
        }
    }
    cancelled
}

/// Execute one call while forwarding its live output, with a heartbeat so
/// consumers know a silent long-running tool is still alive.
async fn run_with_streaming(
    executor: &ActionExecutor,
    call: &AiToolCall,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
) -> ToolResult {
    let (output_tx, mut output_rx) = mpsc::unbounded_channel::<ToolOutputChunk>();

    let forward_tx = event_tx.clone();
    let forward_id = call.id.clone();
    let forward_name = call.name.clone();
    let forwarder = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        loop {
            tokio::select! {
                chunk = output_rx.recv() => match chunk {
                    Some(chunk) => {
                        if !chunk.chunk.is_empty() {
                            let _ = forward_tx.send(LoopEvent::ToolOutputDelta {
                                id: forward_id.clone(),
                                delta: chunk.chunk,
                            });
                        }
                        if chunk.is_complete {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => {
                    let _ = forward_tx.send(LoopEvent::ToolExecuting {
                        id: forward_id.clone(),
                        name: forward_name.clone(),
                    });
                }
            }
        }
    });

    let result = executor
        .execute_streaming(
            &call.name,
            call.arguments.clone(),
            output_tx,
            call.id.clone(),
        )
        .await;

    let _ = forwarder.await;
    result
}

fn push_result(
    results: &mut Vec<Content>,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    call: &AiToolCall,
    result: ToolResult,
) {
    let output = truncate_output(&result.output);
    let _ = event_tx.send(LoopEvent::ToolResult {
        id: call.id.clone(),
        output: output.clone(),
        is_error: result.is_error,
    });
    results.push(Content::ToolResult {
        tool_use_id: call.id.clone(),
        output: Value::String(output),
        is_error: if result.is_error { Some(true) } else { None },
    });
}

enum Decision {
    Approved,
    ApprovedForSession,
    Rejected,
    Stop,
    TimedOut,
}

async fn wait_for_decision(
    tool_call_id: &str,
    input_rx: &mut mpsc::UnboundedReceiver<LoopInput>,
) -> Decision {
    let deadline = tokio::time::Instant::now() + APPROVAL_TIMEOUT;

    loop {
        match tokio::time::timeout_at(deadline, input_rx.recv()).await {
            Ok(Some(LoopInput::Approval {
                tool_call_id: id,
                decision,
            })) if id == tool_call_id => {
                return match decision {
                    ApprovalDecision::ApproveOnce => Decision::Approved,
                    ApprovalDecision::ApproveForSession => Decision::ApprovedForSession,
                    ApprovalDecision::Deny => Decision::Rejected,
                    ApprovalDecision::Stop => Decision::Stop,
                };
            }
            Ok(Some(LoopInput::Cancel)) => return Decision::Stop,
            Ok(Some(_)) => continue, // stale approval for another call
            Ok(None) => return Decision::Stop,
            Err(_) => return Decision::TimedOut,
        }
    }
}

/// Unified diff preview for file mutations shown in approval prompts.
fn approval_diff(ctx: &ToolContext, kind: Option<ActionKind>, arguments: &Value) -> Option<String> {
    if kind != Some(ActionKind::WriteFile) {
        return None;
    }
    let path = arguments.get("path")?.as_str()?;
    let new_content = arguments.get("content")?.as_str()?;
    let resolved = ctx.sandboxed_resolve_new_path(path).ok()?;
    let previous = std::fs::read_to_string(&resolved).unwrap_or_default();
    if previous == new_content {
        return None;
    }
    let diff = similar::TextDiff::from_lines(previous.as_str(), new_content)
        .unified_diff()
        .context_radius(3)
        .header(path, path)
        .to_string();
    Some(diff)
}

pub(crate) fn truncate_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let mut boundary = MAX_TOOL_OUTPUT_CHARS.min(output.len());
    while boundary > 0 && !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    let truncated = &output[..boundary];
    let break_point = truncated.rfind('\n').unwrap_or(boundary);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... output truncated: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}
