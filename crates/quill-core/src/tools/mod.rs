//! Tool surface: the action catalog, execution context, result envelopes,
//! and the built-in operations.

pub mod catalog;
pub mod context;
pub mod ops;
pub mod result;
pub mod truncation;
pub mod validate;

pub use catalog::{builtin_tools, ActionKind, MCP_TOOL_PREFIX};
pub use context::{ToolContext, ToolOutputChunk};
pub use result::{parse_params, ToolResult};
