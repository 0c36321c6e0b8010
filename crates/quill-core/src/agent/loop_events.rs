//! Event protocol between the agent loop and its consumer.
//!
//! The loop emits [`LoopEvent`]s over an unbounded channel and receives
//! [`LoopInput`]s for approvals and cancellation. The CLI is a thin
//! presentation layer over this protocol.

use serde_json::Value;

use crate::permissions::ApprovalDecision;

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The model produced a final response with no further tool calls.
    Completed,
    /// The iteration cap was hit before the model finished.
    IterationCapReached,
    /// The user cancelled the run.
    Interrupted,
    /// No observable progress within the liveness window.
    Stuck,
    /// A provider error or repeated tool failures ended the run.
    Failed,
}

impl std::fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompletionReason::Completed => "completed",
            CompletionReason::IterationCapReached => "iteration cap reached",
            CompletionReason::Interrupted => "interrupted",
            CompletionReason::Stuck => "stuck",
            CompletionReason::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Events emitted by the agent loop.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// Incremental assistant text.
    TextDelta { delta: String },

    /// The model started emitting a tool call.
    ToolCallStart { id: String, name: String },

    /// A tool call's arguments are fully assembled.
    ToolCallComplete {
        id: String,
        name: String,
        arguments: Value,
    },

    /// A tool call needs user approval before it can run.
    ToolApprovalRequired {
        id: String,
        name: String,
        arguments: Value,
        diff: Option<String>,
    },
    ToolApproved {
        id: String,
    },
    ToolDenied {
        id: String,
        reason: String,
    },

    /// A tool call started executing.
    ToolExecuting {
        id: String,
        name: String,
    },
    /// Streamed output from a running tool (shell commands).
    ToolOutputDelta {
        id: String,
        delta: String,
    },
    /// A tool call finished.
    ToolResult {
        id: String,
        output: String,
        is_error: bool,
    },

    /// A delegated subagent started running.
    SubagentStarted {
        name: String,
        kind: String,
    },
    /// A delegated subagent finished.
    SubagentFinished {
        name: String,
        success: bool,
    },

    /// The conversation was compacted.
    Compacted {
        messages_before: usize,
        messages_after: usize,
    },

    Usage {
        prompt_tokens: usize,
        completion_tokens: usize,
    },

    /// One model/tool iteration finished. `has_more` means the loop will
    /// call the model again.
    TurnComplete {
        turn: usize,
        has_more: bool,
    },

    Error {
        error: String,
    },

    /// The loop has exited; no further events follow.
    Finished {
        reason: CompletionReason,
    },
}

/// Inputs the consumer sends into a running loop.
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// Answer to a pending `ToolApprovalRequired` event.
    Approval {
        tool_call_id: String,
        decision: ApprovalDecision,
    },
    /// Cancel the run as soon as possible.
    Cancel,
}
