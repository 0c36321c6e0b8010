//! Core library for quill, an interactive coding agent.
//!
//! The agent loop streams model responses, executes permission-gated tools
//! inside a sandboxed workspace, and reports everything over an event
//! channel. The CLI in `quill-cli` is a thin presentation layer.

pub mod agent;
pub mod ai;
pub mod executor;
pub mod mcp;
pub mod paths;
pub mod permissions;
pub mod session;
pub mod tools;

pub use agent::{AgentConfig, AgentLoop, CompletionReason, Conversation, LoopEvent, LoopInput};
pub use ai::client::{ChatClient, ChatOptions, HttpChatClient};
pub use executor::ActionExecutor;
pub use mcp::McpManager;
pub use permissions::{
    ApprovalDecision, PermissionLevel, PermissionManager, PermissionPolicy,
};
pub use session::SessionStore;
pub use tools::{ActionKind, ToolContext};
