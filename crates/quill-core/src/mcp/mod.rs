//! Model Context Protocol integration: local stdio servers configured via
//! `.mcp.json`, surfaced as `mcp__{server}_{tool}` tools.

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;

pub use config::McpConfig;
pub use manager::{full_tool_name, McpManager, McpServerInfo};
pub use protocol::McpToolDef;
