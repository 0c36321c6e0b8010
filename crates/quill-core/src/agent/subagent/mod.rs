//! Delegated subagents: restricted, bounded agent loops run in parallel.

pub mod cache;
pub mod manager;
pub mod types;

pub use cache::SubagentCache;
pub use manager::SubagentManager;
pub use types::{SubagentKind, SubagentResult, SubagentTask};
