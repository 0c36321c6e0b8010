//! The agent loop and its supporting machinery.

pub mod batch;
pub mod conversation;
pub mod failure;
pub mod loop_events;
pub mod runner;
pub mod stream;
pub mod subagent;

pub use conversation::Conversation;
pub use loop_events::{CompletionReason, LoopEvent, LoopInput};
pub use runner::{AgentConfig, AgentLoop};
pub use subagent::{SubagentKind, SubagentManager, SubagentResult, SubagentTask};
